//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 1xx: Collection errors
//! - 2xx: Index errors
//! - 3xx: Config errors
//! - 4xx: Search errors
//! - 6xx: Storage errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for robot mode output.
///
/// Each variant maps to a numeric code (e.g., `CollectionNotFound` -> E101).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Collection errors (1xx)
    // ========================================
    /// E101: Requested collection does not exist for this user/org
    CollectionNotFound,
    /// E102: Collection exists but its backing store could not be opened
    CollectionUnavailable,

    // ========================================
    // Index errors (2xx)
    // ========================================
    /// E201: Keyword index files are corrupted or unreadable
    IndexCorrupted,
    /// E202: Keyword index backend failed while answering a query
    IndexBackendFailed,

    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E301: Config file has invalid syntax or values
    ConfigInvalid,
    /// E302: Required config value is missing
    ConfigMissingRequired,

    // ========================================
    // Search errors (4xx)
    // ========================================
    /// E401: Search request is malformed
    SearchRequestInvalid,
    /// E403: No backing store answered for any targeted collection
    SearchBackendsUnavailable,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Database operation failed
    DatabaseError,
    /// E602: Serialization/deserialization failed
    SerializationError,
    /// E603: Import input could not be loaded
    ImportFailed,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E901: Unexpected internal error
    InternalError,
    /// E902: IO operation failed
    IoError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `CollectionNotFound` -> 101).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::CollectionNotFound => 101,
            Self::CollectionUnavailable => 102,

            Self::IndexCorrupted => 201,
            Self::IndexBackendFailed => 202,

            Self::ConfigInvalid => 301,
            Self::ConfigMissingRequired => 302,

            Self::SearchRequestInvalid => 401,
            Self::SearchBackendsUnavailable => 403,

            Self::DatabaseError => 601,
            Self::SerializationError => 602,
            Self::ImportFailed => 603,

            Self::InternalError => 901,
            Self::IoError => 902,
        }
    }

    /// Get the error code as a formatted string (e.g., "E101").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::CollectionNotFound => "Check the collection id, user and org. Run `brainsearch import` to create a collection",
            Self::CollectionUnavailable => "The collection store could not be opened. Check permissions on the data root",

            Self::IndexCorrupted => "Re-import the collection to rebuild its keyword index",
            Self::IndexBackendFailed => "Check the keyword backend setting (storage.keyword_backend) and retry",

            Self::ConfigInvalid => "Run `brainsearch config` to see current values. Check TOML syntax in config file",
            Self::ConfigMissingRequired => "Set the required value in config.toml or through a BRAINSEARCH_* variable",

            Self::SearchRequestInvalid => "Provide a non-empty query, at least one collection and positive top-k values",
            Self::SearchBackendsUnavailable => "None of the targeted collections could be searched. Check that they were imported",

            Self::DatabaseError => "The collection database may be corrupted. Re-import the collection",
            Self::SerializationError => "The data format may be corrupted. Check input data for validity",
            Self::ImportFailed => "Check that the import file is JSON lines with docid, text and fragments",

            Self::InternalError => "An unexpected error occurred. Please report this issue with full error output",
            Self::IoError => "File operation failed. Check path exists and permissions are correct",
        }
    }

    /// Check if this error is potentially recoverable by the user.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::CollectionNotFound
            | Self::CollectionUnavailable
            | Self::IndexBackendFailed
            | Self::ConfigInvalid
            | Self::ConfigMissingRequired
            | Self::SearchRequestInvalid
            | Self::SearchBackendsUnavailable
            | Self::ImportFailed
            | Self::IoError => true,

            Self::IndexCorrupted
            | Self::DatabaseError
            | Self::SerializationError
            | Self::InternalError => false,
        }
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            1 => "collection",
            2 => "index",
            3 => "config",
            4 => "search",
            6 => "storage",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Reason code handed to a caller-supplied error sink.
    #[must_use]
    pub const fn reason(&self) -> Reason {
        match self {
            Self::SearchRequestInvalid | Self::ConfigInvalid | Self::ConfigMissingRequired => {
                Reason::BadRequest
            }
            _ => Reason::Internal,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Coarse reason attached to a fatal search failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Internal,
    BadRequest,
}

impl Reason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::BadRequest => "bad_request",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
