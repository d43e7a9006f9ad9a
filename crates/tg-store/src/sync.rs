//! Batched edge sync: one transaction per batch, FIFO within a session.

use tg_core::AdjacencyEdge;

use crate::error::PushError;
use crate::graph_store::GraphStore;
use crate::store::check_order;

/// Push `edges` in order, `batch_size` per transaction.
///
/// Returns the number of edges acknowledged. On failure the failing batch
/// is rolled back and [`PushError::committed`] counts the edges in earlier
/// batches, which stay committed.
pub fn push(
    store: &dyn GraphStore,
    edges: &[AdjacencyEdge],
    batch_size: usize,
) -> Result<usize, PushError> {
    check_order(edges).map_err(|source| PushError {
        committed: 0,
        source,
    })?;

    let mut committed = 0;
    for batch in edges.chunks(batch_size.max(1)) {
        match store.push_edges(batch) {
            Ok(inserted) => {
                committed += batch.len();
                tracing::debug!(
                    batch = batch.len(),
                    inserted,
                    committed,
                    "batch pushed"
                );
            }
            Err(source) => {
                tracing::error!(committed, batch = batch.len(), "batch rolled back: {source}");
                return Err(PushError { committed, source });
            }
        }
    }
    Ok(committed)
}
