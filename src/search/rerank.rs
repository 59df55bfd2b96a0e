//! Request-scoped re-ranking of candidate fragments
//!
//! The fragments fetched from the vector stores are loaded into a throwaway
//! keyword index, each under a synthetic id, queried once with the original
//! text and mapped back to the fragment objects. The index is released when
//! the reranker is dropped, whichever way the request ends.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use super::keyword::{KeywordBackend, KeywordIndex, KeywordQuery};
use super::types::{Fragment, metadata_id};
use crate::error::Result;

/// Metadata key holding an entry's synthetic id inside the ephemeral index.
pub const SYNTHETIC_ID_KEY: &str = "__uniqueid";

/// Issues ids unique across requests: a random nonce plus a local counter.
#[derive(Debug)]
pub struct SyntheticIdGenerator {
    nonce: Uuid,
    counter: u64,
}

impl SyntheticIdGenerator {
    pub fn new() -> Self {
        Self {
            nonce: Uuid::new_v4(),
            counter: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        let id = format!("{}:{}", self.nonce, self.counter);
        self.counter += 1;
        id
    }
}

impl Default for SyntheticIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-use keyword index over one request's candidate fragments.
pub struct EphemeralReranker {
    index: Box<dyn KeywordIndex>,
    fragments: HashMap<String, Fragment>,
}

impl EphemeralReranker {
    /// Index `fragments` in a fresh memory-only index of `backend`.
    pub fn build(
        backend: KeywordBackend,
        langid_field: &str,
        fragments: Vec<Fragment>,
    ) -> Result<Self> {
        let reranker = Self::with_index(backend.ephemeral(langid_field)?, fragments)?;
        debug!(
            backend = %backend,
            fragments = reranker.fragments.len(),
            "built ephemeral index"
        );
        Ok(reranker)
    }

    /// Load `fragments` into `index`, which must be empty.
    ///
    /// The reranker owns `index` from here on, so it is freed even when
    /// loading fails.
    fn with_index(index: Box<dyn KeywordIndex>, fragments: Vec<Fragment>) -> Result<Self> {
        let mut reranker = Self {
            index,
            fragments: HashMap::with_capacity(fragments.len()),
        };

        let mut ids = SyntheticIdGenerator::new();
        for fragment in fragments {
            let id = ids.next_id();
            let mut metadata = fragment.metadata.clone();
            metadata.insert(SYNTHETIC_ID_KEY.to_string(), id.clone().into());
            reranker.index.insert(&fragment.text, metadata)?;
            reranker.fragments.insert(id, fragment);
        }
        reranker.index.commit()?;
        Ok(reranker)
    }

    /// Synthetic ids issued to the indexed fragments.
    pub fn synthetic_ids(&self) -> impl Iterator<Item = &str> {
        self.fragments.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Run the single query, order by raw term frequency and keep `top_k`.
    ///
    /// Consumes the reranker; its index is freed on return.
    pub fn rank(mut self, query: &KeywordQuery<'_>, top_k: usize) -> Result<Vec<Fragment>> {
        let mut entries = self.index.query(query)?;
        self.index.sort_by_raw_term_frequency(&mut entries);
        entries.truncate(top_k);

        let ranked = entries
            .iter()
            .filter_map(|entry| metadata_id(&entry.metadata, SYNTHETIC_ID_KEY))
            .filter_map(|id| self.fragments.remove(&id))
            .collect();
        Ok(ranked)
    }
}

impl Drop for EphemeralReranker {
    fn drop(&mut self) {
        self.index.free_resources();
        self.fragments.clear();
    }
}
