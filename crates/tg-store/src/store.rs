use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use tg_core::{AdjacencyEdge, AdjacencyGraph, RankConfig, Token, rank};

use crate::error::{Result, StoreError};
use crate::schema;

pub struct Store {
    conn: Connection,
}

const RANK_RUNS: &str = "rank_runs";
const LAST_RANK_ITERATIONS: &str = "last_rank_iterations";

/// Row counts, on-disk size and rank history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub tokens: u64,
    pub edges: u64,
    pub sessions: u64,
    pub db_size_bytes: u64,
    /// Completed [`Store::top_tokens`] runs.
    pub rank_runs: u64,
    /// PageRank iterations of the latest run.
    pub last_rank_iterations: Option<u64>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn metadata_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get_metadata(key)?
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|e| StoreError::InvalidData(format!("metadata {key}={v:?}: {e}")))
            })
            .transpose()
    }

    // --- Write ---

    /// Persist one batch of edges atomically. Both endpoint tokens are
    /// upserted; an edge already stored under the same
    /// `(from, to, seq, session)` is skipped. Returns how many edges were new.
    pub fn push_edges(&self, edges: &[AdjacencyEdge]) -> Result<usize> {
        check_order(edges)?;

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut upsert = tx.prepare_cached(
                "INSERT INTO tokens (value) VALUES (?1) ON CONFLICT(value) DO NOTHING",
            )?;
            let mut lookup = tx.prepare_cached("SELECT id FROM tokens WHERE value = ?1")?;
            let mut insert_edge = tx.prepare_cached(
                "INSERT OR IGNORE INTO edges (from_token, to_token, seq, session_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for edge in edges {
                let from = token_id(&mut upsert, &mut lookup, &edge.preceding)?;
                let to = token_id(&mut upsert, &mut lookup, &edge.token)?;
                let seq = i64::try_from(edge.index).map_err(|_| {
                    StoreError::InvalidData(format!("sequence index {} overflows", edge.index))
                })?;
                inserted += insert_edge.execute(params![
                    from,
                    to,
                    seq,
                    edge.session_id.to_string()
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(edges = edges.len(), inserted, "edge batch committed");
        Ok(inserted)
    }

    // --- Rank ---

    /// Recompute rank over the whole stored graph, write it back, and return
    /// the best `fraction` of tokens (at least one when any exist and
    /// `fraction > 0`), highest first.
    ///
    /// The edge projection lives in a temp table that is dropped on every
    /// exit path.
    pub fn top_tokens(&self, fraction: f64) -> Result<Vec<(Token, f64)>> {
        let tx = self.conn.unchecked_transaction()?;
        let projection = Projection::create(&self.conn)?;

        let graph = projection.load()?;
        let ranks = rank(&graph, &RankConfig::default());

        tx.execute("UPDATE tokens SET rank = 0", [])?;
        {
            let mut update = tx.prepare_cached("UPDATE tokens SET rank = ?2 WHERE value = ?1")?;
            for (token, score) in ranks.iter() {
                update.execute(params![token.as_str(), score])?;
            }
        }
        let runs = self.metadata_u64(RANK_RUNS)?.unwrap_or(0) + 1;
        self.set_metadata(RANK_RUNS, &runs.to_string())?;
        self.set_metadata(LAST_RANK_ITERATIONS, &ranks.iterations.to_string())?;
        drop(projection);
        tx.commit()?;

        let ranked = ranks.descending();
        let take = share(ranked.len(), fraction);
        tracing::debug!(
            nodes = ranked.len(),
            take,
            iterations = ranks.iterations,
            converged = ranks.converged,
            "ranked stored graph"
        );
        Ok(ranked.into_iter().take(take).collect())
    }

    /// Stored ranks from the last [`Store::top_tokens`] run, highest first.
    pub fn ranked_tokens(&self, limit: usize) -> Result<Vec<(Token, f64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value, rank FROM tokens ORDER BY rank DESC, id ASC LIMIT ?1")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(Token, f64)> = stmt
            .query_map([limit], |row| {
                Ok((Token::from_encoded(row.get::<_, String>(0)?), row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    // --- Read ---

    /// The token sequence a session produced, in emission order.
    ///
    /// The first edge contributes its preceding token; every edge then
    /// contributes the token it leads to. A session that emitted a single
    /// token stored no edge and reads back empty. Where trimming left a gap
    /// in `seq`, the edge after the gap contributes its preceding token too.
    pub fn session_tokens(&self, session_id: Uuid) -> Result<Vec<Token>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.value, t.value, e.seq
             FROM edges e
             JOIN tokens f ON f.id = e.from_token
             JOIN tokens t ON t.id = e.to_token
             WHERE e.session_id = ?1
             ORDER BY e.seq ASC",
        )?;
        let rows: Vec<(String, String, i64)> = stmt
            .query_map([session_id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut tokens = Vec::with_capacity(rows.len() + 1);
        let mut expected: Option<i64> = None;
        let mut gaps = 0;
        for (from, to, seq) in rows {
            if expected != Some(seq) {
                if expected.is_some() {
                    gaps += 1;
                }
                tokens.push(Token::from_encoded(from));
            }
            tokens.push(Token::from_encoded(to));
            expected = Some(seq + 1);
        }
        if gaps > 0 {
            tracing::warn!(%session_id, gaps, "session sequence has gaps");
        }
        Ok(tokens)
    }

    /// Rebuild a session's original symbol stream.
    pub fn session_symbols(&self, session_id: Uuid) -> Result<Vec<i32>> {
        let mut symbols = Vec::new();
        for token in self.session_tokens(session_id)? {
            symbols.extend(token.symbols()?);
        }
        Ok(symbols)
    }

    /// Sessions with their stored edge counts, most edges first.
    pub fn sessions(&self) -> Result<Vec<(Uuid, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, count(*) FROM edges
             GROUP BY session_id ORDER BY count(*) DESC, session_id ASC",
        )?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter()
            .map(|(id, n)| Ok((parse_session(&id)?, n as u64)))
            .collect()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(StoreStats {
            tokens: count("SELECT count(*) FROM tokens")?,
            edges: count("SELECT count(*) FROM edges")?,
            sessions: count("SELECT count(DISTINCT session_id) FROM edges")?,
            db_size_bytes: self.db_size(),
            rank_runs: self.metadata_u64(RANK_RUNS)?.unwrap_or(0),
            last_rank_iterations: self.metadata_u64(LAST_RANK_ITERATIONS)?,
        })
    }

    /// Page count times page size; 0 if SQLite won't say.
    pub fn db_size(&self) -> u64 {
        let pages: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(0);
        (pages * page_size).max(0) as u64
    }

    /// Fold the WAL into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

/// Temp-table snapshot of the edge list. Dropped with the guard.
struct Projection<'a> {
    conn: &'a Connection,
}

impl<'a> Projection<'a> {
    fn create(conn: &'a Connection) -> Result<Self> {
        conn.execute_batch(
            "DROP TABLE IF EXISTS temp.rank_projection;
             CREATE TEMP TABLE rank_projection AS
                 SELECT f.value AS from_value, t.value AS to_value, e.seq, e.session_id
                 FROM edges e
                 JOIN tokens f ON f.id = e.from_token
                 JOIN tokens t ON t.id = e.to_token
                 ORDER BY e.id;",
        )?;
        Ok(Self { conn })
    }

    fn load(&self) -> Result<AdjacencyGraph> {
        let mut stmt = self.conn.prepare(
            "SELECT from_value, to_value, seq, session_id FROM temp.rank_projection ORDER BY rowid",
        )?;
        let rows: Vec<(String, String, i64, String)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut graph = AdjacencyGraph::new();
        for (from, to, seq, session) in rows {
            graph.record(
                &Token::from_encoded(to),
                Some(&Token::from_encoded(from)),
                seq as u64,
                parse_session(&session)?,
            );
        }
        Ok(graph)
    }
}

impl Drop for Projection<'_> {
    fn drop(&mut self) {
        if let Err(e) = self
            .conn
            .execute_batch("DROP TABLE IF EXISTS temp.rank_projection;")
        {
            tracing::warn!("failed to drop rank projection: {e}");
        }
    }
}

fn token_id(
    upsert: &mut rusqlite::CachedStatement<'_>,
    lookup: &mut rusqlite::CachedStatement<'_>,
    token: &Token,
) -> Result<i64> {
    upsert.execute([token.as_str()])?;
    let id = lookup.query_row([token.as_str()], |row| row.get(0))?;
    Ok(id)
}

fn parse_session(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::InvalidData(format!("session id {raw:?}: {e}")))
}

/// `ceil(n * fraction)`, clamped to `0..=n`.
pub(crate) fn share(n: usize, fraction: f64) -> usize {
    if fraction.is_nan() || fraction <= 0.0 {
        return 0;
    }
    let take = (n as f64 * fraction.min(1.0)).ceil() as usize;
    take.min(n)
}

/// Within each session, indices must strictly increase.
pub(crate) fn check_order(edges: &[AdjacencyEdge]) -> Result<()> {
    let mut last: HashMap<Uuid, u64> = HashMap::new();
    for edge in edges {
        if let Some(previous) = last.insert(edge.session_id, edge.index) {
            if edge.index <= previous {
                return Err(StoreError::OutOfOrder {
                    session_id: edge.session_id,
                    previous,
                    index: edge.index,
                });
            }
        }
    }
    Ok(())
}
