//! Error handling for brainsearch.
//!
//! This module provides:
//! - [`BsError`]: The main error enum for all operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`Reason`]: Coarse reason code handed to search error sinks
//! - [`StructuredError`]: Rich error type with suggestion and context

mod codes;

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::{ErrorCode, Reason};

/// Main error type for brainsearch operations.
#[derive(Error, Debug)]
pub enum BsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Search index error: {0}")]
    SearchIndex(#[from] tantivy::TantivyError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Collection not found: {collection} (user {user}, org {org})")]
    CollectionNotFound {
        user: String,
        org: String,
        collection: String,
    },

    #[error("Collection unavailable: {collection}: {reason}")]
    CollectionUnavailable { collection: String, reason: String },

    #[error("Keyword backend error: {0}")]
    Backend(String),

    #[error("Invalid search request: {0}")]
    InvalidRequest(String),

    #[error("No {stage} could be searched for user {user}")]
    NoBackends { stage: &'static str, user: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BsError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::SearchIndex(_) => ErrorCode::IndexCorrupted,
            Self::Json(_) | Self::Serialization(_) => ErrorCode::SerializationError,
            Self::CollectionNotFound { .. } => ErrorCode::CollectionNotFound,
            Self::CollectionUnavailable { .. } => ErrorCode::CollectionUnavailable,
            Self::Backend(_) => ErrorCode::IndexBackendFailed,
            Self::InvalidRequest(_) => ErrorCode::SearchRequestInvalid,
            Self::NoBackends { .. } => ErrorCode::SearchBackendsUnavailable,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::MissingConfig(_) => ErrorCode::ConfigMissingRequired,
            Self::Import(_) => ErrorCode::ImportFailed,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Reason code reported to a search error sink.
    #[must_use]
    pub const fn reason(&self) -> Reason {
        self.code().reason()
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::CollectionNotFound {
                user,
                org,
                collection,
            } => Some(serde_json::json!({
                "user": user,
                "org": org,
                "collection": collection,
            })),
            Self::CollectionUnavailable { collection, reason } => {
                Some(serde_json::json!({ "collection": collection, "reason": reason }))
            }
            Self::NoBackends { stage, user } => {
                Some(serde_json::json!({ "stage": stage, "user": user }))
            }
            Self::MissingConfig(key) => Some(serde_json::json!({ "config_key": key })),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_bs_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
///
/// Emitted in robot mode so scripts can branch on `code` instead of parsing
/// the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "COLLECTION_NOT_FOUND")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 101)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether this error is potentially recoverable by the user
    pub recoverable: bool,

    /// Error category (e.g., "collection", "config", "search")
    pub category: String,
}

impl StructuredError {
    /// Create a structured error from a [`BsError`].
    #[must_use]
    pub fn from_bs_error(err: &BsError) -> Self {
        let code = err.code();
        let context = err.context();
        let suggestion = suggest_for_error(code, context.as_ref());

        Self {
            code,
            numeric_code: code.numeric(),
            message: err.to_string(),
            suggestion,
            context,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
        }
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&BsError> for StructuredError {
    fn from(err: &BsError) -> Self {
        Self::from_bs_error(err)
    }
}

/// Context-aware suggestion; falls back to the static one per code.
fn suggest_for_error(code: ErrorCode, context: Option<&Value>) -> String {
    let field = |key: &str| context.and_then(|c| c.get(key)).and_then(Value::as_str);

    match code {
        ErrorCode::CollectionNotFound => match field("collection") {
            Some(collection) => format!(
                "Collection '{collection}' has no data under this user/org. \
                 Run `brainsearch import {collection} <file.jsonl>` first"
            ),
            None => code.suggestion().to_string(),
        },
        ErrorCode::ConfigMissingRequired => match field("config_key") {
            Some(key) => format!("Set `{key}` in config.toml or the matching BRAINSEARCH_* variable"),
            None => code.suggestion().to_string(),
        },
        _ => code.suggestion().to_string(),
    }
}

/// Result type alias using [`BsError`].
pub type Result<T> = std::result::Result<T, BsError>;
