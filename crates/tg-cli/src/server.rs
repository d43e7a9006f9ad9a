//! TCP ingestion server: one session actor per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use tg_store::GraphStore;

use crate::config::PipelineConfig;
use crate::pipeline::{Inbound, Session, SessionReport};

const READ_BUF: usize = 64 * 1024;
const CHANNEL_CAPACITY: usize = 256;

/// Accept connections until `shutdown` fires, then wait for every open
/// session to close cleanly.
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn GraphStore>,
    config: PipelineConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let tracker = TaskTracker::new();
    tracing::info!("listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                        continue;
                    }
                };
                let store = Arc::clone(&store);
                let config = config.clone();
                let shutdown = shutdown.clone();
                tracker.spawn(async move {
                    match handle_connection(socket, peer, store, config, shutdown).await {
                        Ok(report) => tracing::debug!(
                            session_id = %report.session_id,
                            bytes = report.bytes,
                            "connection closed"
                        ),
                        Err(e) => tracing::error!(%peer, "session failed: {e:#}"),
                    }
                });
            }
        }
    }

    tracker.close();
    tracing::info!(open = tracker.len(), "shutting down, draining sessions");
    tracker.wait().await;
    Ok(())
}

/// Run one connection to completion.
///
/// The session id goes out first, as its 36-character string form. After
/// that the peer streams little-endian i32 symbols until it closes its side.
pub async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    store: Arc<dyn GraphStore>,
    config: PipelineConfig,
    shutdown: CancellationToken,
) -> Result<SessionReport> {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("session", %session_id);
    tracing::info!(parent: &span, %peer, "new connection");

    socket
        .write_all(session_id.to_string().as_bytes())
        .await
        .context("failed to send session id")?;
    socket.flush().await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let session = Session::new(session_id, config, store);
    let worker = tokio::spawn(session.run(rx).instrument(span.clone()));

    let mut buf = vec![0u8; READ_BUF];
    loop {
        tokio::select! {
            // shutting down closes the stream as if the peer had
            _ = shutdown.cancelled() => break,
            read = socket.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Inbound::Chunk(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(parent: &span, "transport error, aborting session: {e}");
                    let _ = tx.send(Inbound::Abort).await;
                    break;
                }
            }
        }
    }
    drop(tx);

    let report = worker.await??;
    Ok(report)
}
