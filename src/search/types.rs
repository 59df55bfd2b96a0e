//! Shared search types: entries, fragments, requests and results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SearchConfig;
use crate::error::{BsError, Result};
use crate::search::filters::MetadataFilter;

/// Free-form metadata attached to documents and fragments.
pub type Metadata = serde_json::Map<String, Value>;

/// Read an identifier-like metadata value.
///
/// Ingestion tools write ids both as strings and as numbers; both compare
/// as their string form.
pub fn metadata_id(metadata: &Metadata, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Unit exchanged between keyword indexes and the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub text: String,
    pub metadata: Metadata,
    /// Full relevance score (TF-IDF or BM25 with boosts/penalties applied)
    pub score: f32,
    /// IDF-free term frequency component, used for the raw-TF re-sort
    #[serde(default)]
    pub tf_score: f32,
}

impl ScoredEntry {
    pub fn new(text: impl Into<String>, metadata: Metadata, score: f32, tf_score: f32) -> Self {
        Self {
            text: text.into(),
            metadata,
            score,
            tf_score,
        }
    }

    /// Owning document id under `docid_field`.
    pub fn document_id(&self, docid_field: &str) -> Option<String> {
        metadata_id(&self.metadata, docid_field)
    }

    pub fn into_fragment(self) -> Fragment {
        Fragment {
            text: self.text,
            metadata: self.metadata,
        }
    }
}

/// A document chunk as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Fragment {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn document_id(&self, docid_field: &str) -> Option<String> {
        metadata_id(&self.metadata, docid_field)
    }
}

/// Scoring knobs shared by every keyword backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringOptions {
    /// Length-normalized BM25 instead of plain TF-IDF
    #[serde(default)]
    pub bm25: bool,
    /// Down-weight documents far shorter than the corpus average
    #[serde(default)]
    pub punish_verysmall_documents: bool,
    /// Disable the multi-term coordination boost
    #[serde(default)]
    pub ignore_coord: bool,
    /// Boost granted when every query term matches (0.1 = +10%)
    #[serde(default = "default_max_coord_boost")]
    pub max_coord_boost: f32,
}

const fn default_max_coord_boost() -> f32 {
    0.1
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            bm25: false,
            punish_verysmall_documents: false,
            ignore_coord: false,
            max_coord_boost: default_max_coord_boost(),
        }
    }
}

/// Which collections a request targets: a single id or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CollectionSelector {
    One(String),
    Many(Vec<String>),
}

impl CollectionSelector {
    /// Target ids in request order, blanks and duplicates dropped.
    pub fn ids(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::One(id) => vec![id.as_str()],
            Self::Many(ids) => ids.iter().map(String::as_str).collect(),
        };
        let mut out: Vec<String> = Vec::with_capacity(raw.len());
        for id in raw.into_iter().map(str::trim).filter(|id| !id.is_empty()) {
            if !out.iter().any(|seen| seen == id) {
                out.push(id.to_string());
            }
        }
        out
    }
}

impl From<&str> for CollectionSelector {
    fn from(id: &str) -> Self {
        Self::One(id.to_string())
    }
}

impl From<Vec<String>> for CollectionSelector {
    fn from(ids: Vec<String>) -> Self {
        Self::Many(ids)
    }
}

/// A single search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Id of the calling user
    pub id: String,
    pub org: String,
    pub query: String,
    pub collections: CollectionSelector,
    pub top_k_tfidf: usize,
    pub cutoff_score_tfidf: f32,
    pub top_k_vectors: usize,
    #[serde(default = "default_true")]
    pub autocorrect_query: bool,
    #[serde(flatten)]
    pub scoring: ScoringOptions,
    #[serde(default)]
    pub llm_format: bool,
    /// Language id of the query text; English stop words apply when absent
    #[serde(default)]
    pub language: Option<String>,
    /// Applied to documents during the keyword stage only
    #[serde(skip)]
    pub metadata_filter: Option<MetadataFilter>,
}

const fn default_true() -> bool {
    true
}

impl SearchRequest {
    /// Request with the built-in defaults for every tunable.
    pub fn new(
        id: impl Into<String>,
        org: impl Into<String>,
        query: impl Into<String>,
        collections: impl Into<CollectionSelector>,
    ) -> Self {
        Self::with_defaults(&SearchConfig::default(), id, org, query, collections)
    }

    /// Request whose tunables come from the `[search]` config section.
    pub fn with_defaults(
        config: &SearchConfig,
        id: impl Into<String>,
        org: impl Into<String>,
        query: impl Into<String>,
        collections: impl Into<CollectionSelector>,
    ) -> Self {
        Self {
            id: id.into(),
            org: org.into(),
            query: query.into(),
            collections: collections.into(),
            top_k_tfidf: config.top_k_tfidf,
            cutoff_score_tfidf: config.cutoff_score_tfidf,
            top_k_vectors: config.top_k_vectors,
            autocorrect_query: config.autocorrect_query,
            scoring: ScoringOptions {
                bm25: config.bm25,
                punish_verysmall_documents: config.punish_verysmall_documents,
                ignore_coord: config.ignore_coord,
                max_coord_boost: config.max_coord_boost,
            },
            llm_format: false,
            language: None,
            metadata_filter: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.metadata_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    #[must_use]
    pub const fn llm_format(mut self, enabled: bool) -> Self {
        self.llm_format = enabled;
        self
    }

    /// Reject requests the pipeline cannot answer meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(BsError::InvalidRequest("query is empty".to_string()));
        }
        if self.collections.ids().is_empty() {
            return Err(BsError::InvalidRequest(
                "no target collection given".to_string(),
            ));
        }
        if self.top_k_tfidf == 0 || self.top_k_vectors == 0 {
            return Err(BsError::InvalidRequest(
                "top_k_tfidf and top_k_vectors must be positive".to_string(),
            ));
        }
        if !self.cutoff_score_tfidf.is_finite() {
            return Err(BsError::InvalidRequest(
                "cutoff_score_tfidf must be finite".to_string(),
            ));
        }
        if !self.scoring.max_coord_boost.is_finite() || self.scoring.max_coord_boost < 0.0 {
            return Err(BsError::InvalidRequest(
                "max_coord_boost must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Final pipeline result, shaped by `llm_format`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOutput {
    Fragments(Vec<Fragment>),
    Text(String),
}

impl SearchOutput {
    /// "No knowledge" in the requested shape.
    pub const fn empty(llm_format: bool) -> Self {
        if llm_format {
            Self::Text(String::new())
        } else {
            Self::Fragments(Vec::new())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Fragments(fragments) => fragments.is_empty(),
            Self::Text(text) => text.is_empty(),
        }
    }

    pub fn fragments(&self) -> Option<&[Fragment]> {
        match self {
            Self::Fragments(fragments) => Some(fragments),
            Self::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Fragments(_) => None,
        }
    }
}
