//! Per-session ingestion actor.
//!
//! One task owns the session's tokenizer, bank and pending tokens. Chunks
//! arrive over a channel; each wake-up drains everything queued in one
//! pass, so there is never more than one worker touching the bank. Pushes
//! and reseeds run on the blocking pool and report back into the same
//! select loop: at most one of each is in flight, a second reseed request
//! while one is pending is dropped, and a fresh bank is only swapped in
//! between drains.
//!
//! Closing joins in order: flush the window, wait out any in-flight push,
//! then force a final push of everything left.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tg_core::{
    AdjacencyEdge, AdjacencyGraph, BankProfile, Emission, MAX_EDGES_PER_TOKEN, RunningStats,
    SymbolDecoder, Token, TokenBank, Tokenizer, trim,
};
use tg_store::{GraphStore, PushError, StoreError};

use crate::config::PipelineConfig;

/// What the transport hands a session. Dropping the sender is end of stream.
#[derive(Debug)]
pub enum Inbound {
    Chunk(Vec<u8>),
    /// Transport failed: stop without a final push.
    Abort,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("final push for session {session_id} failed: {source}")]
    FinalPush {
        session_id: Uuid,
        #[source]
        source: PushError,
    },
    #[error("session worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Everything a session did, returned when it closes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub bytes: u64,
    pub symbols: u64,
    pub dropped_bytes: u64,
    pub tokens_emitted: u64,
    pub edges_pushed: u64,
    pub pushes: u64,
    pub failed_pushes: u64,
    pub refreshes: u64,
    pub failed_refreshes: u64,
    pub evicted: u64,
    pub trims: u64,
    pub aborted: bool,
    /// MB/s per drain, weighted by bytes.
    pub throughput: RunningStats,
    pub bank: Option<BankProfile>,
}

type PushTask = JoinHandle<Result<usize, PushError>>;
type RefreshTask = JoinHandle<Result<Vec<Token>, StoreError>>;

pub struct Session {
    id: Uuid,
    config: PipelineConfig,
    store: Arc<dyn GraphStore>,
    bank: TokenBank,
    tokenizer: Tokenizer,
    decoder: SymbolDecoder,
    /// Emitted tokens not yet acknowledged by the store. The front token is
    /// the anchor: already stored as the tail of the last pushed edge, or
    /// the first token of the session.
    pending: VecDeque<Emission>,
    graph: AdjacencyGraph,
    previous: Option<Token>,
    /// Key count right after the last trim; no re-rank until it grows.
    trimmed_keys: usize,
    push: Option<PushTask>,
    refresh: Option<RefreshTask>,
    closing: bool,
    report: SessionReport,
}

impl Session {
    pub fn new(id: Uuid, config: PipelineConfig, store: Arc<dyn GraphStore>) -> Self {
        let bank = TokenBank::new(config.bank_mode());
        Self {
            id,
            config,
            store,
            bank,
            tokenizer: Tokenizer::new(),
            decoder: SymbolDecoder::new(),
            pending: VecDeque::new(),
            graph: AdjacencyGraph::new(),
            previous: None,
            trimmed_keys: 0,
            push: None,
            refresh: None,
            closing: false,
            report: SessionReport {
                session_id: id,
                ..SessionReport::default()
            },
        }
    }

    /// Drive the session until the channel closes or an abort arrives.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Inbound>) -> Result<SessionReport, PipelineError> {
        info!(session_id = %self.id, "session started");
        if self.config.seed_on_start {
            self.start_refresh();
        }

        let mut aborted = false;
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let Inbound::Chunk(first) = msg else {
                        aborted = true;
                        break;
                    };

                    let mut chunks = vec![first];
                    while let Ok(msg) = rx.try_recv() {
                        match msg {
                            Inbound::Chunk(chunk) => chunks.push(chunk),
                            Inbound::Abort => {
                                aborted = true;
                                break;
                            }
                        }
                    }
                    if aborted {
                        break;
                    }
                    self.drain(&chunks);
                    self.maybe_trim();
                    self.maybe_push();
                }
                Some(joined) = join_task(&mut self.push), if self.push.is_some() => {
                    self.push = None;
                    // a failed batch waits for the next drain to retry
                    if self.on_push(joined) {
                        self.maybe_push();
                    }
                }
                Some(joined) = join_task(&mut self.refresh), if self.refresh.is_some() => {
                    self.refresh = None;
                    self.on_refresh(joined);
                }
            }
        }

        self.close(aborted).await
    }

    /// Decode and segment one batch of chunks.
    fn drain(&mut self, chunks: &[Vec<u8>]) {
        let started = Instant::now();
        let bytes: usize = chunks.iter().map(Vec::len).sum();

        let mut symbols = Vec::new();
        for chunk in chunks {
            self.decoder.push(chunk, &mut symbols);
        }
        let mut emitted = Vec::new();
        self.tokenizer
            .feed_all(&symbols, &mut self.bank, &mut emitted);
        let count = emitted.len();
        self.accept(emitted);

        self.report.bytes += bytes as u64;
        self.report.symbols += symbols.len() as u64;

        let secs = started.elapsed().as_secs_f64();
        if secs > 0.0 && bytes > 0 {
            let mbps = bytes as f64 / 1_000_000.0 / secs;
            self.report.throughput.push_weighted(mbps, bytes as f64);
            if self.config.verbose {
                info!(session_id = %self.id, chunks = chunks.len(), bytes, emitted = count, "{mbps:.2} MB/s");
            } else {
                debug!(session_id = %self.id, chunks = chunks.len(), bytes, emitted = count, "{mbps:.2} MB/s");
            }
        }
    }

    fn accept(&mut self, emitted: Vec<Emission>) {
        self.report.tokens_emitted += emitted.len() as u64;
        if self.config.trim_max_tokens > 0 {
            let mut batch = AdjacencyGraph::new();
            for e in &emitted {
                batch.record(&e.token, self.previous.as_ref(), e.index, self.id);
                self.previous = Some(e.token.clone());
            }
            self.graph.merge(batch);
        }
        self.pending.extend(emitted);
    }

    /// Rank-trim the session graph once it outgrows its budget and forget
    /// the evicted tokens. Re-ranks only after new keys arrived since the
    /// last trim, and caps the occurrences kept per key.
    fn maybe_trim(&mut self) {
        let max = self.config.trim_max_tokens;
        if max == 0 {
            return;
        }
        let keys = self.graph.len();
        if keys > max && keys > self.trimmed_keys {
            let removed = trim(&mut self.graph, self.config.trim_k);
            let forgotten = self.bank.remove_all(&removed);
            self.trimmed_keys = self.graph.len();
            self.report.evicted += forgotten as u64;
            self.report.trims += 1;
            debug!(
                session_id = %self.id,
                removed = removed.len(),
                forgotten,
                keys = self.graph.len(),
                "session graph trimmed"
            );
        }
        if self.graph.edge_count() > max.saturating_mul(MAX_EDGES_PER_TOKEN) {
            let dropped = self.graph.compact(MAX_EDGES_PER_TOKEN);
            debug!(session_id = %self.id, dropped, "session graph compacted");
        }
    }

    /// Edges between consecutive pending tokens, tagged with the index of
    /// the later one.
    fn pending_edges(&self) -> Vec<AdjacencyEdge> {
        self.pending
            .iter()
            .zip(self.pending.iter().skip(1))
            .map(|(prev, cur)| AdjacencyEdge {
                preceding: prev.token.clone(),
                token: cur.token.clone(),
                index: cur.index,
                session_id: self.id,
            })
            .collect()
    }

    fn unpushed(&self) -> usize {
        self.pending.len().saturating_sub(1)
    }

    fn maybe_push(&mut self) {
        if self.push.is_some() || self.unpushed() <= self.config.push_threshold {
            return;
        }
        let edges = self.pending_edges();
        debug!(session_id = %self.id, edges = edges.len(), "push started");
        let store = Arc::clone(&self.store);
        let batch_size = self.config.batch_size;
        self.push = Some(tokio::task::spawn_blocking(move || {
            tg_store::push(store.as_ref(), &edges, batch_size)
        }));
    }

    /// Drop the tokens whose outgoing edge is now stored.
    fn acknowledge(&mut self, committed: usize) {
        let n = committed.min(self.unpushed());
        self.pending.drain(..n);
        self.report.edges_pushed += n as u64;
    }

    /// Settle a finished push. Returns whether it succeeded.
    fn on_push(&mut self, joined: Result<Result<usize, PushError>, JoinError>) -> bool {
        match joined {
            Ok(Ok(committed)) => {
                self.acknowledge(committed);
                self.report.pushes += 1;
                debug!(session_id = %self.id, committed, "push finished");
                if self.config.refresh_after_push && !self.closing {
                    self.start_refresh();
                }
                true
            }
            Ok(Err(e)) => {
                self.acknowledge(e.committed);
                self.report.failed_pushes += 1;
                error!(
                    session_id = %self.id,
                    retained = self.unpushed(),
                    "push failed, will retry: {e}"
                );
                false
            }
            Err(e) => {
                // nothing is known to be committed; stored edges are
                // idempotent, so the retry may overlap safely
                self.report.failed_pushes += 1;
                error!(session_id = %self.id, "push worker failed: {e}");
                false
            }
        }
    }

    fn start_refresh(&mut self) {
        if self.refresh.is_some() {
            debug!(session_id = %self.id, "refresh already pending, request dropped");
            return;
        }
        let store = Arc::clone(&self.store);
        let percentile = self.config.seed_percentile;
        self.refresh = Some(tokio::task::spawn_blocking(move || {
            store.query_top_tokens(percentile)
        }));
    }

    fn on_refresh(&mut self, joined: Result<Result<Vec<Token>, StoreError>, JoinError>) {
        match joined {
            Ok(Ok(tokens)) if tokens.is_empty() => {
                debug!(session_id = %self.id, "store has no ranked tokens, keeping bank");
            }
            Ok(Ok(tokens)) => {
                let before = self.bank.len();
                self.bank = TokenBank::from_tokens(tokens, self.config.bank_mode());
                self.report.refreshes += 1;
                debug!(session_id = %self.id, before, after = self.bank.len(), "bank reseeded");
            }
            Ok(Err(e)) => {
                self.report.failed_refreshes += 1;
                warn!(session_id = %self.id, "refresh failed, keeping bank: {e}");
            }
            Err(e) => {
                self.report.failed_refreshes += 1;
                warn!(session_id = %self.id, "refresh worker failed: {e}");
            }
        }
    }

    async fn close(mut self, aborted: bool) -> Result<SessionReport, PipelineError> {
        self.closing = true;

        let dropped = self.decoder.finish();
        if dropped > 0 {
            warn!(session_id = %self.id, dropped, "stream ended mid-symbol, trailing bytes skipped");
        }
        self.report.dropped_bytes = dropped as u64;

        if !aborted && let Some(last) = self.tokenizer.finish(&mut self.bank) {
            self.accept(vec![last]);
        }

        if let Some(task) = self.push.take() {
            let joined = task.await;
            self.on_push(joined);
        }
        // a pending reseed can't matter any more
        drop(self.refresh.take());

        if aborted {
            self.report.aborted = true;
            warn!(
                session_id = %self.id,
                unpushed = self.unpushed(),
                "session aborted"
            );
            return Ok(self.finish_report());
        }

        let edges = self.pending_edges();
        if !edges.is_empty() {
            let store = Arc::clone(&self.store);
            let batch_size = self.config.batch_size;
            let result =
                tokio::task::spawn_blocking(move || tg_store::push(store.as_ref(), &edges, batch_size))
                    .await?;
            match result {
                Ok(committed) => {
                    self.acknowledge(committed);
                    self.report.pushes += 1;
                }
                Err(source) => {
                    self.acknowledge(source.committed);
                    self.report.failed_pushes += 1;
                    error!(session_id = %self.id, "final push failed: {source}");
                    return Err(PipelineError::FinalPush {
                        session_id: self.id,
                        source,
                    });
                }
            }
        }

        let report = self.finish_report();
        let t = &report.throughput;
        info!(
            session_id = %report.session_id,
            tokens = report.tokens_emitted,
            edges = report.edges_pushed,
            "stream ended, all tokens pushed; {:.2} min | {:.2} std | {:.2} max | {:.2} mean MB/s",
            t.min().unwrap_or(0.0),
            t.std_dev(),
            t.max().unwrap_or(0.0),
            t.weighted_average().unwrap_or(0.0),
        );
        Ok(report)
    }

    fn finish_report(&mut self) -> SessionReport {
        let mut report = std::mem::take(&mut self.report);
        report.bank = Some(self.bank.profile());
        report
    }
}

async fn join_task<T>(task: &mut Option<JoinHandle<T>>) -> Option<Result<T, JoinError>> {
    match task {
        Some(handle) => Some(handle.await),
        None => None,
    }
}
