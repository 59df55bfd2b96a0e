//! Tantivy-backed keyword index
//!
//! Tantivy stores the documents and finds candidates through its inverted
//! index; scores are computed by [`super::scoring`] from the stored analyzed
//! tokens so both backends rank a corpus identically.
//!
//! Documents are analyzed by [`super::tokenize`] before indexing and the
//! resulting tokens are indexed with tantivy's whitespace tokenizer.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as JsonValue;
use tantivy::collector::DocSetCollector;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, Schema, TextFieldIndexing, TextOptions, Value,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use tracing::{debug, warn};

use super::keyword::{KeywordIndex, KeywordQuery, resolve_query_terms};
use super::scoring::{self, CorpusStats, TermStat, score_document};
use super::tokenize::analyze_document;
use super::types::{Metadata, ScoredEntry};
use crate::error::{BsError, Result};

const WRITER_MEMORY: usize = 50_000_000;
const EPHEMERAL_WRITER_MEMORY: usize = 15_000_000;

/// Keyword index stored in a tantivy index
pub struct TantivyKeywordIndex {
    index: Index,
    reader: IndexReader,
    /// Taken on first write; opened indexes stay read-only until then
    writer: RwLock<Option<IndexWriter>>,
    fields: KeywordFields,
    next_seq: AtomicU64,
    in_memory: bool,
    langid_field: String,
}

/// Field handles for the keyword schema
#[derive(Clone, Copy)]
struct KeywordFields {
    /// Analyzed tokens, space separated
    terms: Field,
    text: Field,
    /// Metadata as a JSON string
    metadata: Field,
    /// Insertion order, used to break score ties
    seq: Field,
}

struct Candidate {
    seq: u64,
    entry: ScoredEntry,
}

impl TantivyKeywordIndex {
    /// Open an existing index; fails when none exists at `path`.
    pub fn open(path: impl AsRef<Path>, langid_field: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.join("meta.json").exists() {
            return Err(BsError::Backend(format!(
                "no tantivy index at {}",
                path.display()
            )));
        }
        let index = Index::open_in_dir(path)?;
        Self::from_parts(index, None, false, langid_field)
    }

    /// Open the index at `path`, creating it when missing.
    pub fn create(path: impl AsRef<Path>, langid_field: &str) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let index = if path.join("meta.json").exists() {
            Index::open_in_dir(path)?
        } else {
            Index::create_in_dir(path, build_schema())?
        };
        let writer = index.writer(WRITER_MEMORY)?;
        Self::from_parts(index, Some(writer), false, langid_field)
    }

    /// Open an in-memory index
    pub fn in_memory(langid_field: &str) -> Result<Self> {
        let index = Index::create_in_ram(build_schema());
        let writer = index.writer_with_num_threads(1, EPHEMERAL_WRITER_MEMORY)?;
        Self::from_parts(index, Some(writer), true, langid_field)
    }

    fn from_parts(
        index: Index,
        writer: Option<IndexWriter>,
        in_memory: bool,
        langid_field: &str,
    ) -> Result<Self> {
        let fields = extract_fields(&index.schema())?;

        // Manual reload: commit() refreshes the reader itself
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let next_seq = AtomicU64::new(reader.searcher().num_docs());

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(writer),
            fields,
            next_seq,
            in_memory,
            langid_field: langid_field.to_string(),
        })
    }

    fn lock_writer(&self) -> Result<std::sync::RwLockWriteGuard<'_, Option<IndexWriter>>> {
        self.writer.write().map_err(|e| {
            BsError::SearchIndex(tantivy::TantivyError::InternalError(format!(
                "Failed to acquire write lock: {e}"
            )))
        })
    }

    /// Run `f` with the writer, taking the index lock on first use.
    fn with_writer<R>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<R>) -> Result<R> {
        let mut guard = self.lock_writer()?;
        if guard.is_none() {
            *guard = Some(self.index.writer(WRITER_MEMORY)?);
        }
        match guard.as_mut() {
            Some(writer) => f(writer),
            None => Err(BsError::Internal("tantivy writer unavailable".to_string())),
        }
    }

    fn term(&self, text: &str) -> Term {
        Term::from_field_text(self.fields.terms, text)
    }

    fn doc_freq(&self, searcher: &Searcher, term: &str) -> u64 {
        searcher.doc_freq(&self.term(term)).unwrap_or(0)
    }

    fn corpus_stats(&self, searcher: &Searcher) -> Result<CorpusStats> {
        let mut total_tokens = 0u64;
        for segment in searcher.segment_readers() {
            total_tokens += segment.inverted_index(self.fields.terms)?.total_num_tokens();
        }
        Ok(CorpusStats::new(searcher.num_docs(), total_tokens))
    }

    /// Every indexed term with its document frequency across segments.
    fn vocabulary(&self, searcher: &Searcher) -> Result<Vec<(String, u64)>> {
        let mut merged: BTreeMap<String, u64> = BTreeMap::new();
        for segment in searcher.segment_readers() {
            let inverted = segment.inverted_index(self.fields.terms)?;
            let mut stream = inverted.terms().stream()?;
            while stream.advance() {
                if let Ok(term) = std::str::from_utf8(stream.key()) {
                    *merged.entry(term.to_string()).or_insert(0) +=
                        u64::from(stream.value().doc_freq);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn load(&self, searcher: &Searcher, address: tantivy::DocAddress) -> Result<(u64, String, Metadata, String)> {
        let doc: TantivyDocument = searcher.doc(address)?;
        let text_of = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let seq = doc
            .get_first(self.fields.seq)
            .and_then(|v| v.as_u64())
            .unwrap_or_default();
        let metadata_json = text_of(self.fields.metadata);
        let metadata: Metadata = if metadata_json.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(&metadata_json)?
        };
        Ok((seq, text_of(self.fields.text), metadata, text_of(self.fields.terms)))
    }
}

impl KeywordIndex for TantivyKeywordIndex {
    fn insert(&self, text: &str, metadata: Metadata) -> Result<()> {
        let language = metadata.get(&self.langid_field).and_then(JsonValue::as_str);
        let tokens = analyze_document(text, language);

        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.terms, tokens.join(" "));
        doc.add_text(self.fields.text, text);
        doc.add_text(self.fields.metadata, serde_json::to_string(&metadata)?);
        doc.add_u64(self.fields.seq, self.next_seq.fetch_add(1, Ordering::SeqCst));

        self.with_writer(|writer| {
            writer.add_document(doc)?;
            Ok(())
        })
    }

    fn commit(&self) -> Result<()> {
        let mut guard = self.lock_writer()?;
        let Some(writer) = guard.as_mut() else {
            // Nothing was ever written through this handle
            return Ok(());
        };
        writer.commit()?;
        drop(guard); // Release lock before reload

        self.reader.reload()?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut guard = self.lock_writer()?;
        if let Some(writer) = guard.as_mut() {
            writer.rollback()?;
        }
        Ok(())
    }

    fn query(&self, query: &KeywordQuery<'_>) -> Result<Vec<ScoredEntry>> {
        let searcher = self.reader.searcher();
        if searcher.num_docs() == 0 {
            return Ok(Vec::new());
        }

        let mut vocabulary_error = None;
        let terms = resolve_query_terms(
            query.text,
            query.language,
            query.autocorrect,
            |t| self.doc_freq(&searcher, t),
            || {
                self.vocabulary(&searcher).unwrap_or_else(|err| {
                    vocabulary_error = Some(err);
                    Vec::new()
                })
            },
        );
        if let Some(err) = vocabulary_error {
            return Err(err);
        }
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let stats: Vec<TermStat> = terms
            .iter()
            .map(|term| TermStat {
                term: term.clone(),
                doc_freq: self.doc_freq(&searcher, term),
            })
            .collect();
        let corpus = self.corpus_stats(&searcher)?;

        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|term| {
                let q: Box<dyn Query> =
                    Box::new(TermQuery::new(self.term(term), IndexRecordOption::WithFreqs));
                (Occur::Should, q)
            })
            .collect();
        let matches = searcher.search(&BooleanQuery::new(clauses), &DocSetCollector)?;
        debug!(terms = ?terms, matches = matches.len(), "tantivy candidates");

        let mut candidates: Vec<Candidate> = Vec::with_capacity(matches.len());
        for address in matches {
            let (seq, text, metadata, analyzed) = self.load(&searcher, address)?;
            if !query.admits(&metadata) {
                continue;
            }
            let mut counts: HashMap<&str, u32> = HashMap::new();
            let mut length = 0usize;
            for token in analyzed.split_whitespace() {
                *counts.entry(token).or_insert(0) += 1;
                length += 1;
            }
            let Some(scored) = score_document(
                &stats,
                |t| counts.get(t).copied().unwrap_or(0),
                length,
                corpus,
                &query.options,
            ) else {
                continue;
            };
            candidates.push(Candidate {
                seq,
                entry: ScoredEntry::new(text, metadata, scored.score, scored.tf_score),
            });
        }

        // DocSetCollector is unordered; restore insertion order for stable ties
        candidates.sort_by_key(|c| c.seq);
        let entries = candidates.into_iter().map(|c| c.entry).collect();
        Ok(scoring::rank(entries, query.top_k, query.cutoff))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn len(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    fn free_resources(&self) {
        let Ok(mut guard) = self.lock_writer() else {
            return;
        };
        let Some(writer) = guard.as_mut() else {
            return;
        };
        if let Err(err) = writer.rollback() {
            warn!(error = %err, "tantivy rollback failed");
        }
        if !self.in_memory {
            return;
        }
        let cleared = writer
            .delete_all_documents()
            .and_then(|_| writer.commit());
        drop(guard);
        match cleared {
            Ok(_) => {
                if let Err(err) = self.reader.reload() {
                    warn!(error = %err, "tantivy reader reload failed");
                }
            }
            Err(err) => warn!(error = %err, "failed to clear in-memory tantivy index"),
        }
    }
}

/// Build the Tantivy schema for keyword indexing
fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    // Tokens are produced by our analyzer, tantivy only splits on spaces
    let terms_options = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("whitespace")
                .set_index_option(IndexRecordOption::WithFreqs),
        )
        .set_stored();

    builder.add_text_field("terms", terms_options);
    builder.add_text_field("text", STORED);
    builder.add_text_field("metadata", STORED);
    builder.add_u64_field("seq", STORED);

    builder.build()
}

/// Extract field handles from schema
fn extract_fields(schema: &Schema) -> Result<KeywordFields> {
    let field = |name: &str| {
        schema.get_field(name).map_err(|_| {
            BsError::SearchIndex(tantivy::TantivyError::SchemaError(format!(
                "missing {name} field"
            )))
        })
    };
    Ok(KeywordFields {
        terms: field("terms")?,
        text: field("text")?,
        metadata: field("metadata")?,
        seq: field("seq")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filters::MetadataFilter;
    use crate::search::tfidf::TfIdfIndex;
    use serde_json::json;
    use tempfile::tempdir;

    fn meta(value: JsonValue) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    const DOCS: [(&str, &str); 4] = [
        ("refunds", "Refunds are issued within 30 days of purchase."),
        ("shipping", "Our shipping policy covers domestic and international orders."),
        ("policy", "The refund policy: a refund requires the original receipt."),
        ("returns", "Returned items must be unused. See the refund policy."),
    ];

    fn fill(index: &dyn KeywordIndex) {
        for (id, text) in DOCS {
            index.insert(text, meta(json!({"docid": id, "langid": "en"}))).unwrap();
        }
        index.commit().unwrap();
    }

    fn ids(entries: &[ScoredEntry]) -> Vec<String> {
        entries.iter().filter_map(|e| e.document_id("docid")).collect()
    }

    #[test]
    fn test_in_memory_starts_empty() {
        let index = TantivyKeywordIndex::in_memory("langid").unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_index_and_search() {
        let index = TantivyKeywordIndex::in_memory("langid").unwrap();
        fill(&index);
        assert_eq!(index.len(), 4);

        let results = index.query(&KeywordQuery::new("refund policy", 10)).unwrap();
        assert_eq!(ids(&results)[0], "policy");
        assert!(results.iter().all(|e| e.score > 0.0 && e.tf_score > 0.0));
    }

    #[test]
    fn test_ranks_like_tfidf_backend() {
        let tantivy = TantivyKeywordIndex::in_memory("langid").unwrap();
        let tfidf = TfIdfIndex::in_memory("langid");
        fill(&tantivy);
        fill(&tfidf);

        for text in ["refund policy", "shipping orders", "refnd", "receipt refund"] {
            let a = tantivy.query(&KeywordQuery::new(text, 10)).unwrap();
            let b = tfidf.query(&KeywordQuery::new(text, 10)).unwrap();
            assert_eq!(ids(&a), ids(&b), "query {text}");
            for (x, y) in a.iter().zip(&b) {
                assert!((x.score - y.score).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_filter_and_cap() {
        let index = TantivyKeywordIndex::in_memory("langid").unwrap();
        fill(&index);

        let filter = MetadataFilter::new().equals("docid", "returns");
        let filtered = index
            .query(&KeywordQuery::new("refund policy", 10).filter(Some(&filter)))
            .unwrap();
        assert_eq!(ids(&filtered), vec!["returns"]);

        let capped = index.query(&KeywordQuery::new("refund policy", 1)).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_rollback_discards_pending_documents() {
        let index = TantivyKeywordIndex::in_memory("langid").unwrap();
        fill(&index);
        index
            .insert("refund abuse report", meta(json!({"docid": "late"})))
            .unwrap();
        index.rollback().unwrap();
        index.commit().unwrap();
        assert_eq!(index.len(), 4);
        assert!(index.query(&KeywordQuery::new("abuse", 10)).unwrap().is_empty());
    }

    #[test]
    fn test_no_matches() {
        let index = TantivyKeywordIndex::in_memory("langid").unwrap();
        fill(&index);
        assert!(index.query(&KeywordQuery::new("zebra", 10)).unwrap().is_empty());
    }

    #[test]
    fn test_free_resources_clears_in_memory_index() {
        let index = TantivyKeywordIndex::in_memory("langid").unwrap();
        fill(&index);
        index.free_resources();
        assert!(index.is_empty());
        index.free_resources();
    }

    #[test]
    fn test_reopen_persistent_index() {
        let dir = tempdir().unwrap();
        assert!(TantivyKeywordIndex::open(dir.path(), "langid").is_err());
        {
            let index = TantivyKeywordIndex::create(dir.path(), "langid").unwrap();
            fill(&index);
        }
        let reopened = TantivyKeywordIndex::open(dir.path(), "langid").unwrap();
        assert_eq!(reopened.len(), 4);
        let results = reopened.query(&KeywordQuery::new("shipping", 10)).unwrap();
        assert_eq!(ids(&results), vec!["shipping"]);

        // free_resources never wipes a persistent index
        reopened.free_resources();
        assert_eq!(reopened.len(), 4);
    }

    #[test]
    fn test_readers_open_while_writer_is_held() {
        let dir = tempdir().unwrap();
        let writer = TantivyKeywordIndex::create(dir.path(), "langid").unwrap();
        fill(&writer);

        let first = TantivyKeywordIndex::open(dir.path(), "langid").unwrap();
        let second = TantivyKeywordIndex::open(dir.path(), "langid").unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(second.query(&KeywordQuery::new("refund", 10)).unwrap().len(), 2);
        second.commit().unwrap();
    }
}
