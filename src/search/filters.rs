//! Metadata filters for the keyword stage and for fragment fetches
//!
//! Two kinds of filter live here:
//! - [`MetadataFilter`]: caller-supplied predicate applied to documents while
//!   the keyword indexes are queried (field equality and/or a closure)
//! - [`FragmentFilter`]: the filter expression a vector store evaluates,
//!   typically "document id is one of these"

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::types::{Metadata, metadata_id};
use crate::error::{BsError, Result};

type Predicate = Arc<dyn Fn(&Metadata) -> bool + Send + Sync>;

/// Caller-supplied document filter
#[derive(Clone, Default)]
pub struct MetadataFilter {
    /// All must hold: `metadata[key] == value`
    equals: Vec<(String, Value)>,
    /// Arbitrary predicate, evaluated after the equality checks
    predicate: Option<Predicate>,
}

impl fmt::Debug for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataFilter")
            .field("equals", &self.equals)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl MetadataFilter {
    /// Create new empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `metadata[key] == value`
    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    /// Require an arbitrary predicate to hold
    #[must_use]
    pub fn predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Metadata) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(f));
        self
    }

    /// Parse `key=value` pairs as given on the command line.
    ///
    /// Values that parse as JSON (numbers, booleans) compare as such,
    /// everything else as a string.
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut filter = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, raw) = pair.split_once('=').ok_or_else(|| {
                BsError::InvalidRequest(format!("filter '{pair}' is not key=value"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(BsError::InvalidRequest(format!(
                    "filter '{pair}' has an empty key"
                )));
            }
            let raw = raw.trim();
            let value = match serde_json::from_str::<Value>(raw) {
                Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
                _ => Value::String(raw.to_string()),
            };
            filter = filter.equals(key, value);
        }
        Ok(filter)
    }

    /// Check if any condition is set
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.predicate.is_none()
    }

    /// Check if a metadata object passes the filter
    pub fn matches(&self, metadata: &Metadata) -> bool {
        let equal = self
            .equals
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected));
        equal && self.predicate.as_ref().is_none_or(|p| p(metadata))
    }
}

/// Filter expression understood by vector stores
#[derive(Debug, Clone)]
pub enum FragmentFilter {
    /// Every fragment
    All,
    /// Fragments whose `field` holds one of `ids`
    DocumentIn {
        field: String,
        ids: BTreeSet<String>,
    },
    /// Fragments passing a metadata filter
    Metadata(MetadataFilter),
}

impl FragmentFilter {
    pub fn document_in(field: impl Into<String>, ids: impl IntoIterator<Item = String>) -> Self {
        Self::DocumentIn {
            field: field.into(),
            ids: ids.into_iter().collect(),
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::All => true,
            Self::DocumentIn { field, ids } => {
                metadata_id(metadata, field).is_some_and(|id| ids.contains(&id))
            }
            Self::Metadata(filter) => filter.matches(metadata),
        }
    }
}
