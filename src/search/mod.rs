//! Hybrid retrieval over document collections
//!
//! A query is resolved in two stages: keyword indexes pick the most relevant
//! documents, then those documents' fragments are fetched from the vector
//! stores and re-ranked in a request-scoped keyword index.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                 SearchRequest (query, collections)             │
//! └────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │  KeywordIndex per collection (tfidf.rs / tantivy.rs)           │
//! │  merge → raw-TF sort → top_k_tfidf → document ids              │
//! └────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │  VectorStore per collection (vector.rs)                        │
//! │  fragments whose document id is in the set                     │
//! └────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │  EphemeralReranker (rerank.rs) → top_k_vectors                 │
//! └────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//!                  ResultFormatter (format.rs)
//! ```

pub mod filters;
pub mod format;
pub mod keyword;
pub mod orchestrator;
pub mod rerank;
pub mod scoring;
pub mod tantivy;
pub mod tfidf;
pub mod tokenize;
pub mod types;
pub mod vector;

// Re-export main types
pub use filters::{FragmentFilter, MetadataFilter};
pub use format::ResultFormatter;
pub use keyword::{KeywordBackend, KeywordIndex, KeywordQuery};
pub use orchestrator::{ErrorSink, OrchestratorSettings, SearchOrchestrator, TracingErrorSink};
pub use rerank::{EphemeralReranker, SyntheticIdGenerator};
pub use tantivy::TantivyKeywordIndex;
pub use tfidf::TfIdfIndex;
pub use types::{
    CollectionSelector, Fragment, Metadata, ScoredEntry, ScoringOptions, SearchOutput,
    SearchRequest,
};
pub use vector::{SqliteVectorStore, VectorStore};
