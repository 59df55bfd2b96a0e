//! In-process TF-IDF keyword index
//!
//! Keeps the whole corpus (term counts per document plus document
//! frequencies) in memory. When opened from a path every committed batch is
//! also written to SQLite and reloaded on the next open; without a path the
//! index is memory-only, which is the form the re-ranking stage uses.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, params};
use serde_json::Value;
use tracing::debug;

use super::keyword::{KeywordIndex, KeywordQuery, resolve_query_terms};
use super::scoring::{self, CorpusStats, TermStat, score_document};
use super::tokenize::analyze_document;
use super::types::{Metadata, ScoredEntry};
use crate::error::Result;
use crate::storage::{self, migrations::KEYWORD_MIGRATIONS};

struct IndexedDocument {
    text: String,
    metadata: Metadata,
    length: usize,
    counts: HashMap<String, u32>,
}

#[derive(Default)]
struct Corpus {
    docs: Vec<IndexedDocument>,
    doc_freq: BTreeMap<String, u64>,
    total_tokens: u64,
}

impl Corpus {
    fn add(&mut self, doc: IndexedDocument) {
        for term in doc.counts.keys() {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
        self.total_tokens += doc.length as u64;
        self.docs.push(doc);
    }

    fn doc_freq(&self, term: &str) -> u64 {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    fn stats(&self) -> CorpusStats {
        CorpusStats::new(self.docs.len() as u64, self.total_tokens)
    }
}

/// TF-IDF index, optionally persisted to SQLite.
pub struct TfIdfIndex {
    corpus: RwLock<Corpus>,
    pending: Mutex<Vec<(String, Metadata)>>,
    store: Option<Mutex<Connection>>,
    langid_field: String,
}

impl TfIdfIndex {
    /// Memory-only index.
    pub fn in_memory(langid_field: &str) -> Self {
        Self {
            corpus: RwLock::new(Corpus::default()),
            pending: Mutex::new(Vec::new()),
            store: None,
            langid_field: langid_field.to_string(),
        }
    }

    /// Open (or create) the SQLite-backed index at `path` and load its corpus.
    pub fn open(path: impl AsRef<Path>, langid_field: &str) -> Result<Self> {
        let conn = storage::open_database(path.as_ref(), &KEYWORD_MIGRATIONS)?;
        let index = Self::in_memory(langid_field);

        {
            let mut stmt = conn.prepare("SELECT text, metadata_json FROM documents ORDER BY seq")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut corpus = index.corpus.write();
            for row in rows {
                let (text, metadata_json) = row?;
                let metadata: Metadata = serde_json::from_str(&metadata_json)?;
                corpus.add(index.analyze(text, metadata));
            }
            debug!(
                path = %path.as_ref().display(),
                documents = corpus.docs.len(),
                "loaded tf-idf corpus"
            );
        }

        Ok(Self {
            store: Some(Mutex::new(conn)),
            ..index
        })
    }

    fn analyze(&self, text: String, metadata: Metadata) -> IndexedDocument {
        let language = metadata.get(&self.langid_field).and_then(Value::as_str);
        let tokens = analyze_document(&text, language);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *counts.entry(token.clone()).or_insert(0) += 1;
        }
        IndexedDocument {
            length: tokens.len(),
            text,
            metadata,
            counts,
        }
    }

    fn persist(&self, batch: &[(String, Metadata)]) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut conn = store.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (text, metadata_json, indexed_at) VALUES (?1, ?2, ?3)",
            )?;
            let now = chrono::Utc::now().to_rfc3339();
            for (text, metadata) in batch {
                stmt.execute(params![text, serde_json::to_string(metadata)?, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl KeywordIndex for TfIdfIndex {
    fn insert(&self, text: &str, metadata: Metadata) -> Result<()> {
        self.pending.lock().push((text.to_string(), metadata));
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(());
        }
        self.persist(&batch)?;

        let docs: Vec<IndexedDocument> = batch
            .into_iter()
            .map(|(text, metadata)| self.analyze(text, metadata))
            .collect();
        let mut corpus = self.corpus.write();
        for doc in docs {
            corpus.add(doc);
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.pending.lock().clear();
        Ok(())
    }

    fn query(&self, query: &KeywordQuery<'_>) -> Result<Vec<ScoredEntry>> {
        let corpus = self.corpus.read();
        if corpus.docs.is_empty() {
            return Ok(Vec::new());
        }

        let terms = resolve_query_terms(
            query.text,
            query.language,
            query.autocorrect,
            |t| corpus.doc_freq(t),
            || {
                corpus
                    .doc_freq
                    .iter()
                    .map(|(t, df)| (t.clone(), *df))
                    .collect()
            },
        );
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stats: Vec<TermStat> = terms
            .into_iter()
            .map(|term| TermStat {
                doc_freq: corpus.doc_freq(&term),
                term,
            })
            .collect();
        let corpus_stats = corpus.stats();

        let candidates: Vec<ScoredEntry> = corpus
            .docs
            .iter()
            .filter(|doc| query.admits(&doc.metadata))
            .filter_map(|doc| {
                let scored = score_document(
                    &stats,
                    |t| doc.counts.get(t).copied().unwrap_or(0),
                    doc.length,
                    corpus_stats,
                    &query.options,
                )?;
                Some(ScoredEntry::new(
                    doc.text.clone(),
                    doc.metadata.clone(),
                    scored.score,
                    scored.tf_score,
                ))
            })
            .collect();

        Ok(scoring::rank(candidates, query.top_k, query.cutoff))
    }

    fn len(&self) -> usize {
        self.corpus.read().docs.len()
    }

    fn free_resources(&self) {
        self.pending.lock().clear();
        *self.corpus.write() = Corpus::default();
    }
}
