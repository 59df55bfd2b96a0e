//! Relevance scoring shared by every keyword backend
//!
//! ## Formulas
//!
//! For a query term `t` occurring `c` times in a document of `len` tokens,
//! in a corpus of `N` documents where `df` documents contain `t`:
//!
//! ```text
//! tf(t)        = c / len
//! tfidf(t)     = tf(t) * (ln((N + 1) / (df + 1)) + 1)
//! bm25(t)      = ln(1 + (N - df + 0.5) / (df + 0.5))
//!                * c * (k1 + 1) / (c + k1 * (1 - b + b * len / avg_len))
//! coord        = 1 + max_coord_boost * (matched - 1) / (terms - 1)
//! small_doc    = len / (avg_len * 0.25)     when len < avg_len * 0.25
//! ```
//!
//! The IDF-free signal `tf_score = Σ tf(t)` is kept next to the score: once a
//! candidate set has passed the same keyword filter, IDF no longer
//! discriminates inside it and the pipeline re-sorts on `tf_score` alone.

use std::cmp::Ordering;

use super::types::{ScoredEntry, ScoringOptions};

/// BM25 term saturation.
pub const BM25_K1: f32 = 1.2;
/// BM25 length normalization.
pub const BM25_B: f32 = 0.75;
/// Documents shorter than this share of the average length get penalized.
pub const VERY_SMALL_DOCUMENT_RATIO: f32 = 0.25;

/// Corpus-wide statistics a score depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorpusStats {
    pub num_docs: u64,
    pub avg_doc_len: f32,
}

impl CorpusStats {
    #[allow(clippy::cast_precision_loss)]
    pub fn new(num_docs: u64, total_tokens: u64) -> Self {
        let avg_doc_len = if num_docs == 0 {
            0.0
        } else {
            total_tokens as f32 / num_docs as f32
        };
        Self {
            num_docs,
            avg_doc_len,
        }
    }
}

/// A query term with its document frequency in the searched corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermStat {
    pub term: String,
    pub doc_freq: u64,
}

/// Score of one document, `None` when no query term occurs in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentScore {
    pub score: f32,
    pub tf_score: f32,
    pub matched_terms: usize,
}

#[allow(clippy::cast_precision_loss)]
fn idf_tfidf(num_docs: u64, doc_freq: u64) -> f32 {
    ((num_docs as f32 + 1.0) / (doc_freq as f32 + 1.0)).ln() + 1.0
}

#[allow(clippy::cast_precision_loss)]
fn idf_bm25(num_docs: u64, doc_freq: u64) -> f32 {
    let n = num_docs as f32;
    let df = (doc_freq as f32).min(n);
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Score a document given per-term occurrence counts.
///
/// `count_of` returns how often a query term occurs in the document;
/// `doc_len` is the document's analyzed token count.
#[allow(clippy::cast_precision_loss)]
pub fn score_document<F>(
    terms: &[TermStat],
    count_of: F,
    doc_len: usize,
    corpus: CorpusStats,
    options: &ScoringOptions,
) -> Option<DocumentScore>
where
    F: Fn(&str) -> u32,
{
    if terms.is_empty() || doc_len == 0 {
        return None;
    }

    let len = doc_len as f32;
    let avg_len = if corpus.avg_doc_len > 0.0 {
        corpus.avg_doc_len
    } else {
        len
    };

    let mut score = 0.0f32;
    let mut tf_score = 0.0f32;
    let mut matched = 0usize;

    for stat in terms {
        let count = count_of(&stat.term);
        if count == 0 {
            continue;
        }
        matched += 1;
        let c = count as f32;
        let tf = c / len;
        tf_score += tf;

        score += if options.bm25 {
            let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len);
            idf_bm25(corpus.num_docs, stat.doc_freq) * c * (BM25_K1 + 1.0) / (c + norm)
        } else {
            tf * idf_tfidf(corpus.num_docs, stat.doc_freq)
        };
    }

    if matched == 0 {
        return None;
    }

    if !options.ignore_coord && terms.len() > 1 {
        let coverage = (matched - 1) as f32 / (terms.len() - 1) as f32;
        score *= options.max_coord_boost.mul_add(coverage, 1.0);
    }

    if options.punish_verysmall_documents {
        let threshold = avg_len * VERY_SMALL_DOCUMENT_RATIO;
        if len < threshold {
            score *= len / threshold;
        }
    }

    Some(DocumentScore {
        score,
        tf_score,
        matched_terms: matched,
    })
}

/// Stable descending sort on the full score.
pub fn sort_by_score(entries: &mut [ScoredEntry]) {
    entries.sort_by(|a, b| descending(a.score, b.score));
}

/// Stable descending sort on the IDF-free term frequency.
///
/// Equal values keep their incoming order, which makes the re-sort
/// deterministic for a deterministic input.
pub fn sort_by_raw_term_frequency(entries: &mut [ScoredEntry]) {
    entries.sort_by(|a, b| descending(a.tf_score, b.tf_score));
}

fn descending(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

/// Drop entries under `cutoff`, order by score and cap at `top_k`.
pub fn rank(mut entries: Vec<ScoredEntry>, top_k: usize, cutoff: f32) -> Vec<ScoredEntry> {
    entries.retain(|e| e.score >= cutoff);
    sort_by_score(&mut entries);
    entries.truncate(top_k);
    entries
}
