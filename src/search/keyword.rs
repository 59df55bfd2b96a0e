//! Keyword index capability and backend selection

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::filters::MetadataFilter;
use super::scoring;
use super::tantivy::TantivyKeywordIndex;
use super::tfidf::TfIdfIndex;
use super::tokenize::{analyze_query, correct_term};
use super::types::{Metadata, ScoredEntry, ScoringOptions};
use crate::error::{BsError, Result};

/// Parameters of one keyword query.
#[derive(Debug, Clone)]
pub struct KeywordQuery<'a> {
    pub text: &'a str,
    /// Maximum number of entries returned
    pub top_k: usize,
    /// Entries scoring below this are dropped
    pub cutoff: f32,
    pub filter: Option<&'a MetadataFilter>,
    pub options: ScoringOptions,
    /// Rewrite query terms missing from the vocabulary
    pub autocorrect: bool,
    /// Language id selecting the query's stop words
    pub language: Option<&'a str>,
}

impl<'a> KeywordQuery<'a> {
    pub fn new(text: &'a str, top_k: usize) -> Self {
        Self {
            text,
            top_k,
            cutoff: 0.0,
            filter: None,
            options: ScoringOptions::default(),
            autocorrect: true,
            language: None,
        }
    }

    #[must_use]
    pub const fn cutoff(mut self, cutoff: f32) -> Self {
        self.cutoff = cutoff;
        self
    }

    #[must_use]
    pub const fn filter(mut self, filter: Option<&'a MetadataFilter>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub const fn options(mut self, options: ScoringOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn autocorrect(mut self, enabled: bool) -> Self {
        self.autocorrect = enabled;
        self
    }

    #[must_use]
    pub const fn language(mut self, language: Option<&'a str>) -> Self {
        self.language = language;
        self
    }

    /// Whether a document passes the caller's metadata filter.
    pub fn admits(&self, metadata: &Metadata) -> bool {
        self.filter.is_none_or(|f| f.matches(metadata))
    }
}

/// A statistical text index over documents or fragments.
///
/// Inserted entries become searchable after [`KeywordIndex::commit`].
pub trait KeywordIndex: Send + Sync {
    fn insert(&self, text: &str, metadata: Metadata) -> Result<()>;

    fn commit(&self) -> Result<()>;

    /// Discard entries inserted since the last commit.
    fn rollback(&self) -> Result<()>;

    /// Entries scoring at least `query.cutoff`, best first, at most
    /// `query.top_k`. Ties keep insertion order.
    fn query(&self, query: &KeywordQuery<'_>) -> Result<Vec<ScoredEntry>>;

    /// Number of committed entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sort_by_raw_term_frequency(&self, entries: &mut [ScoredEntry]) {
        scoring::sort_by_raw_term_frequency(entries);
    }

    /// Release memory and handles held by the index. Idempotent.
    fn free_resources(&self);
}

/// Keyword index implementation, chosen once from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordBackend {
    /// In-process TF-IDF corpus persisted to SQLite
    #[default]
    TfIdf,
    /// Tantivy inverted index
    Tantivy,
}

impl KeywordBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TfIdf => "tfidf",
            Self::Tantivy => "tantivy",
        }
    }

    /// Open an existing persistent index stored at `path`.
    pub fn open(self, path: &Path, langid_field: &str) -> Result<Box<dyn KeywordIndex>> {
        Ok(match self {
            Self::TfIdf => Box::new(TfIdfIndex::open(path.join("keyword.db"), langid_field)?),
            Self::Tantivy => Box::new(TantivyKeywordIndex::open(path, langid_field)?),
        })
    }

    /// Create (or reopen) the persistent index stored at `path`.
    pub fn create(self, path: &Path, langid_field: &str) -> Result<Box<dyn KeywordIndex>> {
        std::fs::create_dir_all(path)?;
        Ok(match self {
            Self::TfIdf => Box::new(TfIdfIndex::open(path.join("keyword.db"), langid_field)?),
            Self::Tantivy => Box::new(TantivyKeywordIndex::create(path, langid_field)?),
        })
    }

    /// Memory-only index that lives as long as the returned handle.
    pub fn ephemeral(self, langid_field: &str) -> Result<Box<dyn KeywordIndex>> {
        Ok(match self {
            Self::TfIdf => Box::new(TfIdfIndex::in_memory(langid_field)),
            Self::Tantivy => Box::new(TantivyKeywordIndex::in_memory(langid_field)?),
        })
    }

    /// Whether a persistent index of this kind exists at `path`.
    pub fn exists_at(self, path: &Path) -> bool {
        match self {
            Self::TfIdf => path.join("keyword.db").is_file(),
            Self::Tantivy => path.join("meta.json").is_file(),
        }
    }
}

impl fmt::Display for KeywordBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordBackend {
    type Err = BsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tfidf" | "tf-idf" => Ok(Self::TfIdf),
            "tantivy" => Ok(Self::Tantivy),
            other => Err(BsError::Config(format!(
                "unknown keyword backend: {other} (expected tfidf or tantivy)"
            ))),
        }
    }
}

/// Analyze query text into search terms, autocorrecting absent ones.
///
/// `doc_freq` reports how many documents hold a term; `vocabulary` is only
/// called when a correction is needed.
pub(crate) fn resolve_query_terms<D, V>(
    text: &str,
    language: Option<&str>,
    autocorrect: bool,
    doc_freq: D,
    vocabulary: V,
) -> Vec<String>
where
    D: Fn(&str) -> u64,
    V: FnOnce() -> Vec<(String, u64)>,
{
    let terms = analyze_query(text, language);
    if !autocorrect || terms.iter().all(|t| doc_freq(t) > 0) {
        return terms;
    }

    let vocab = vocabulary();
    let mut resolved: Vec<String> = Vec::with_capacity(terms.len());
    for term in terms {
        let term = if doc_freq(&term) > 0 {
            term
        } else {
            match correct_term(&term, vocab.iter().map(|(t, df)| (t.as_str(), *df))) {
                Some(corrected) => {
                    debug!(from = %term, to = %corrected, "autocorrected query term");
                    corrected
                }
                None => term,
            }
        };
        if !resolved.contains(&term) {
            resolved.push(term);
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn df(term: &str) -> u64 {
        match term {
            "refund" => 3,
            "policy" => 2,
            _ => 0,
        }
    }

    fn vocab() -> Vec<(String, u64)> {
        vec![("refund".into(), 3), ("policy".into(), 2)]
    }

    #[test]
    fn backend_parses_from_config_strings() {
        assert_eq!("tfidf".parse::<KeywordBackend>().unwrap(), KeywordBackend::TfIdf);
        assert_eq!(" Tantivy ".parse::<KeywordBackend>().unwrap(), KeywordBackend::Tantivy);
        assert!("lucene".parse::<KeywordBackend>().is_err());
        assert_eq!(KeywordBackend::default().to_string(), "tfidf");
    }

    #[test]
    fn query_terms_are_corrected_when_missing() {
        let terms = resolve_query_terms("refnd polcy", None, true, df, vocab);
        assert_eq!(terms, vec!["refund", "policy"]);
    }

    #[test]
    fn query_terms_untouched_without_autocorrect() {
        let terms = resolve_query_terms("refnd polcy", None, false, df, || {
            panic!("vocabulary must not be read")
        });
        assert_eq!(terms, vec!["refnd", "polcy"]);
    }

    #[test]
    fn vocabulary_skipped_when_all_terms_known() {
        let terms = resolve_query_terms("refund policy", None, true, df, || {
            panic!("vocabulary must not be read")
        });
        assert_eq!(terms, vec!["refund", "policy"]);
    }

    #[test]
    fn corrections_collapse_duplicates() {
        let terms = resolve_query_terms("refund refnd", None, true, df, vocab);
        assert_eq!(terms, vec!["refund"]);
    }

    #[test]
    fn query_language_picks_stop_words() {
        let known = |_: &str| 1;
        let none = || Vec::new();
        assert_eq!(
            resolve_query_terms("die refund policy", Some("de"), true, known, none),
            vec!["refund", "policy"]
        );
        assert_eq!(
            resolve_query_terms("die refund policy", None, true, known, none),
            vec!["die", "refund", "policy"]
        );
    }

    #[test]
    fn query_admits_by_filter() {
        let filter = MetadataFilter::new().equals("langid", "en");
        let mut en = Metadata::new();
        en.insert("langid".into(), "en".into());
        let mut ja = Metadata::new();
        ja.insert("langid".into(), "ja".into());

        let unfiltered = KeywordQuery::new("q", 1);
        assert!(unfiltered.admits(&ja));

        let query = KeywordQuery::new("q", 1).filter(Some(&filter));
        assert!(query.admits(&en));
        assert!(!query.admits(&ja));
    }
}
