//! Storage layer for brainsearch
//!
//! SQLite connections for the persisted backends plus the resolver that maps
//! a (user, org, collection) scope to its opened stores.

pub mod migrations;
pub mod resolver;

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub use resolver::{CollectionResolver, CollectionScope, FsCollectionResolver};

/// Open a database file, applying pragmas and the given migrations.
pub fn open_database(path: &Path, migrations: &[&str]) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    migrations::run_migrations(&conn, migrations)?;
    Ok(conn)
}

/// Private in-memory database with the given migrations applied.
pub fn open_memory_database(migrations: &[&str]) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    migrations::run_migrations(&conn, migrations)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}
