//! Vector store: embedded fragments per collection
//!
//! Fragments are kept in SQLite with their embedding encoded as
//! little-endian f16. Two access paths exist:
//! - metadata scan: no vector given, every fragment passing the filter is
//!   returned in insertion order
//! - similarity: fragments passing the filter ranked by cosine similarity

use std::path::Path;

use half::f16;
use parking_lot::Mutex;
use rusqlite::{Connection, params, params_from_iter};
use tracing::debug;

use super::filters::FragmentFilter;
use super::types::{Fragment, Metadata, ScoredEntry};
use crate::error::{BsError, Result};
use crate::storage::{self, migrations::VECTOR_MIGRATIONS};

/// Bound parameters per `IN (...)` query.
const ID_CHUNK: usize = 500;

/// Store of embedded fragments for one collection.
pub trait VectorStore: Send + Sync {
    /// Add a fragment; `embedding` may be absent for scan-only stores.
    fn insert(&self, fragment: &Fragment, embedding: Option<&[f32]>) -> Result<()>;

    /// Add many fragments atomically: either all are stored or none.
    fn insert_batch(&self, batch: &[(Fragment, Option<Vec<f32>>)]) -> Result<usize>;

    /// Fragments passing `filter`.
    ///
    /// Without `vector` this is a pure metadata scan in insertion order.
    /// With it, fragments are ranked by cosine similarity, those below
    /// `threshold` dropped. `top_k` caps either form.
    fn query(
        &self,
        vector: Option<&[f32]>,
        top_k: Option<usize>,
        threshold: Option<f32>,
        filter: &FragmentFilter,
    ) -> Result<Vec<ScoredEntry>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

struct StoredFragment {
    seq: i64,
    text: String,
    metadata: Metadata,
    embedding: Option<Vec<f32>>,
}

/// SQLite-backed [`VectorStore`].
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    docid_field: String,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, docid_field: &str) -> Result<Self> {
        let conn = storage::open_database(path.as_ref(), &VECTOR_MIGRATIONS)?;
        Ok(Self::with_connection(conn, docid_field))
    }

    pub fn open_in_memory(docid_field: &str) -> Result<Self> {
        let conn = storage::open_memory_database(&VECTOR_MIGRATIONS)?;
        Ok(Self::with_connection(conn, docid_field))
    }

    fn with_connection(conn: Connection, docid_field: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            docid_field: docid_field.to_string(),
        }
    }

    fn fetch_by_document(&self, ids: &[&String]) -> Result<Vec<StoredFragment>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT seq, text, metadata_json, embedding, dims FROM fragments \
                 WHERE doc_id IN ({placeholders}) ORDER BY seq"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), read_row)?;
            for row in rows {
                out.push(decode_row(row?)?);
            }
        }
        // Chunks each come back ordered; restore a global insertion order
        out.sort_by_key(|f| f.seq);
        Ok(out)
    }

    fn scan(&self, filter: &FragmentFilter) -> Result<Vec<StoredFragment>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT seq, text, metadata_json, embedding, dims FROM fragments ORDER BY seq",
        )?;
        let rows = stmt.query_map([], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            let fragment = decode_row(row?)?;
            if filter.matches(&fragment.metadata) {
                out.push(fragment);
            }
        }
        Ok(out)
    }
}

type RawRow = (i64, String, String, Option<Vec<u8>>, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn decode_row((seq, text, metadata_json, blob, dims): RawRow) -> Result<StoredFragment> {
    let metadata: Metadata = serde_json::from_str(&metadata_json)?;
    let embedding = match blob {
        Some(bytes) if dims > 0 => Some(decode_embedding_f16(&bytes, dims as usize)?),
        _ => None,
    };
    Ok(StoredFragment {
        seq,
        text,
        metadata,
        embedding,
    })
}

#[allow(clippy::cast_possible_wrap)]
fn insert_fragment(
    conn: &Connection,
    fragment: &Fragment,
    embedding: Option<&[f32]>,
    docid_field: &str,
) -> Result<()> {
    let doc_id = fragment.document_id(docid_field);
    let blob = embedding.map(encode_embedding_f16);
    let dims = embedding.map_or(0, <[f32]>::len) as i64;
    conn.execute(
        "INSERT INTO fragments (text, metadata_json, doc_id, embedding, dims, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            fragment.text,
            serde_json::to_string(&fragment.metadata)?,
            doc_id,
            blob,
            dims,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl VectorStore for SqliteVectorStore {
    fn insert(&self, fragment: &Fragment, embedding: Option<&[f32]>) -> Result<()> {
        let conn = self.conn.lock();
        insert_fragment(&conn, fragment, embedding, &self.docid_field)
    }

    fn insert_batch(&self, batch: &[(Fragment, Option<Vec<f32>>)]) -> Result<usize> {
        let mut conn = self.conn.lock();
        // Dropping the transaction on an early return rolls it back
        let tx = conn.transaction()?;
        for (fragment, embedding) in batch {
            insert_fragment(&tx, fragment, embedding.as_deref(), &self.docid_field)?;
        }
        tx.commit()?;
        debug!(fragments = batch.len(), "stored fragment batch");
        Ok(batch.len())
    }

    fn query(
        &self,
        vector: Option<&[f32]>,
        top_k: Option<usize>,
        threshold: Option<f32>,
        filter: &FragmentFilter,
    ) -> Result<Vec<ScoredEntry>> {
        let fragments = match filter {
            FragmentFilter::DocumentIn { field, ids } if *field == self.docid_field => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let ids: Vec<&String> = ids.iter().collect();
                self.fetch_by_document(&ids)?
            }
            other => self.scan(other)?,
        };

        let mut entries: Vec<ScoredEntry> = match vector {
            None => fragments
                .into_iter()
                .map(|f| ScoredEntry::new(f.text, f.metadata, 0.0, 0.0))
                .collect(),
            Some(query) => {
                let mut ranked = Vec::with_capacity(fragments.len());
                for fragment in fragments {
                    let Some(embedding) = fragment.embedding else {
                        continue;
                    };
                    if embedding.len() != query.len() {
                        debug!(
                            expected = query.len(),
                            found = embedding.len(),
                            "skipping fragment with mismatched embedding dims"
                        );
                        continue;
                    }
                    let similarity = cosine_similarity(query, &embedding);
                    if threshold.is_some_and(|t| similarity < t) {
                        continue;
                    }
                    ranked.push(ScoredEntry::new(
                        fragment.text,
                        fragment.metadata,
                        similarity,
                        0.0,
                    ));
                }
                ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
                ranked
            }
        };

        if let Some(limit) = top_k {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Cosine similarity; 0 when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn encode_embedding_f16(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for value in values {
        let bits = f16::from_f32(*value).to_bits();
        out.extend_from_slice(&bits.to_le_bytes());
    }
    out
}

fn decode_embedding_f16(bytes: &[u8], dims: usize) -> Result<Vec<f32>> {
    let expected = dims.saturating_mul(2);
    if bytes.len() != expected {
        return Err(BsError::Serialization(format!(
            "embedding blob length mismatch: expected {}, got {}",
            expected,
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(dims);
    for chunk in bytes.chunks_exact(2) {
        let bits = u16::from_le_bytes([chunk[0], chunk[1]]);
        out.push(f16::from_bits(bits).to_f32());
    }
    Ok(out)
}
