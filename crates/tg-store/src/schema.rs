use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // Fold any stale WAL into the main file. Fails harmlessly in memory.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tokens (
            id    INTEGER PRIMARY KEY AUTOINCREMENT,
            value TEXT NOT NULL UNIQUE CHECK (length(value) > 0),
            rank  REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS edges (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            from_token INTEGER NOT NULL REFERENCES tokens(id),
            to_token   INTEGER NOT NULL REFERENCES tokens(id),
            seq        INTEGER NOT NULL,
            session_id TEXT NOT NULL,
            UNIQUE (from_token, to_token, seq, session_id)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_session ON edges(session_id, seq);
        CREATE INDEX IF NOT EXISTS idx_tokens_rank ON tokens(rank DESC);
        ",
    )?;

    if let Some(found) = get_schema_version(conn)? {
        if found > SCHEMA_VERSION {
            return Err(StoreError::InvalidData(format!(
                "store schema v{found} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
