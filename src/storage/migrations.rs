//! Database migrations

use rusqlite::Connection;

use crate::error::{BsError, Result};

/// Schema of a persisted TF-IDF keyword index.
pub const KEYWORD_MIGRATIONS: [&str; 1] = ["
CREATE TABLE IF NOT EXISTS documents (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    text          TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    indexed_at    TEXT NOT NULL
);
"];

/// Schema of a collection's vector store.
pub const VECTOR_MIGRATIONS: [&str; 2] = [
    "
CREATE TABLE IF NOT EXISTS fragments (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    text          TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    doc_id        TEXT,
    embedding     BLOB,
    dims          INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);
",
    "
CREATE INDEX IF NOT EXISTS idx_fragments_doc_id ON fragments(doc_id);
",
];

/// Apply every migration above the database's `user_version`.
///
/// Returns the resulting schema version.
#[allow(clippy::cast_possible_truncation)]
pub fn run_migrations(conn: &Connection, migrations: &[&str]) -> Result<u32> {
    let current_version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|err| BsError::Internal(format!("read user_version: {err}")))?;

    let schema_version = migrations.len() as u32;
    if current_version > schema_version {
        return Err(BsError::Internal(format!(
            "database schema version {current_version} is newer than supported {schema_version}"
        )));
    }

    for (idx, sql) in migrations.iter().enumerate() {
        let target_version = (idx + 1) as u32;
        if current_version >= target_version {
            continue;
        }

        conn.execute_batch(sql).map_err(|err| {
            BsError::Internal(format!("migration {target_version} failed: {err}"))
        })?;
        conn.pragma_update(None, "user_version", target_version)
            .map_err(|err| {
                BsError::Internal(format!(
                    "failed to set user_version {target_version}: {err}"
                ))
            })?;
    }

    Ok(schema_version)
}
