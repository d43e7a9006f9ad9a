use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tg_core::{AdjacencyEdge, Token};

use crate::error::Result;
use crate::store::Store;

/// The narrow surface an ingestion session needs from persistence.
///
/// Implementations are shared between concurrent sessions and called from
/// blocking worker threads.
pub trait GraphStore: Send + Sync {
    /// Tokens in the top `percentile` share by stored-graph rank.
    fn query_top_tokens(&self, percentile: f64) -> Result<Vec<Token>>;

    /// Persist one batch in a single transaction. Returns newly stored edges.
    fn push_edges(&self, batch: &[AdjacencyEdge]) -> Result<usize>;
}

/// [`Store`] behind a mutex, one connection shared by every session.
/// Each call is its own transaction; sessions never share one.
pub struct SqliteGraphStore {
    store: Mutex<Store>,
}

impl SqliteGraphStore {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Store::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    /// Direct access for inspection and maintenance.
    pub fn store(&self) -> MutexGuard<'_, Store> {
        // a panic mid-call leaves the connection usable: the open
        // transaction rolled back when its guard dropped
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GraphStore for SqliteGraphStore {
    fn query_top_tokens(&self, percentile: f64) -> Result<Vec<Token>> {
        let ranked = self.store().top_tokens(percentile)?;
        Ok(ranked.into_iter().map(|(token, _)| token).collect())
    }

    fn push_edges(&self, batch: &[AdjacencyEdge]) -> Result<usize> {
        self.store().push_edges(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn edge(from: &str, to: &str, index: u64, session: Uuid) -> AdjacencyEdge {
        AdjacencyEdge {
            preceding: Token::from_text(from),
            token: Token::from_text(to),
            index,
            session_id: session,
        }
    }

    #[test]
    fn test_trait_object_roundtrip() {
        let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let s = Uuid::new_v4();
        store
            .push_edges(&[edge("x", "y", 1, s), edge("y", "x", 2, s), edge("z", "y", 3, s)])
            .unwrap();
        let top = store.query_top_tokens(0.3).unwrap();
        assert_eq!(top, vec![Token::from_text("y")]);
    }

    #[test]
    fn test_concurrent_sessions_share_store() {
        let store = Arc::new(SqliteGraphStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let s = Uuid::new_v4();
                    for i in 1..=10u64 {
                        store.push_edges(&[edge("a", "b", i, s)]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = store.store().stats().unwrap();
        assert_eq!(stats.edges, 40);
        assert_eq!(stats.sessions, 4);
    }
}
