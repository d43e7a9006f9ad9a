mod config;
mod pipeline;
mod server;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tg_core::{AdjacencyGraph, BankProfile, TokenBank, segment, text_symbols, trim};
use tg_store::SqliteGraphStore;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "tg", about = "Online token graph: streaming tokenizer, ingestion server and store")]
struct Cli {
    /// Config file (default: tg.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept symbol streams over TCP, one session per connection
    Serve {
        /// Listen address, overrides [server] bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Segment text files and push their token graphs to the store
    Ingest {
        /// File path(s) to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Trim low-rank tokens at mean + k * std before pushing
        #[arg(long)]
        trim_k: Option<f64>,
    },

    /// Rank the stored graph and print its top tokens
    Top {
        /// Share of tokens to print, 0..=1
        #[arg(long, default_value_t = 0.2)]
        percentile: f64,
    },

    /// Rebuild a session's text from its stored edges
    Reconstruct {
        session_id: Uuid,
    },

    /// Show store statistics
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn open_store(config: &Config) -> Result<SqliteGraphStore> {
    let path = config.store_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    SqliteGraphStore::open(&path)
        .with_context(|| format!("failed to open store {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    config.pipeline.verbose |= cli.verbose;
    init_tracing(config.pipeline.verbose);

    match &cli.command {
        Commands::Serve { bind } => cmd_serve(config, bind.as_deref()).await,
        Commands::Ingest { files, trim_k } => cmd_ingest(&config, files, *trim_k),
        Commands::Top { percentile } => cmd_top(&config, *percentile),
        Commands::Reconstruct { session_id } => cmd_reconstruct(&config, *session_id),
        Commands::Stats { json } => cmd_stats(&config, *json),
    }
}

async fn cmd_serve(config: Config, bind: Option<&str>) -> Result<()> {
    let store = Arc::new(open_store(&config)?);
    let addr = bind.unwrap_or(&config.server.bind);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            return;
        }
        tracing::info!("interrupt received");
        signal.cancel();
    });

    server::serve(listener, store.clone(), config.pipeline, shutdown).await?;

    if let Err(e) = store.store().checkpoint() {
        tracing::warn!("checkpoint on shutdown failed: {e}");
    }
    Ok(())
}

fn cmd_ingest(config: &Config, files: &[PathBuf], trim_k: Option<f64>) -> Result<()> {
    let store = open_store(config)?;
    let pipeline = &config.pipeline;

    for path in files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let session_id = ingest_text(&store, config, &content, trim_k)
            .with_context(|| format!("failed to ingest {}", path.display()))?;
        println!("{session_id}\t{}", path.display());
    }

    if pipeline.verbose {
        let stats = store.store().stats()?;
        eprintln!(
            "--- store: tokens={}, edges={}, sessions={} ---",
            stats.tokens, stats.edges, stats.sessions
        );
    }
    Ok(())
}

/// One document is one session: seed, segment, graph, optional trim, push.
fn ingest_text(
    store: &SqliteGraphStore,
    config: &Config,
    text: &str,
    trim_k: Option<f64>,
) -> Result<Uuid> {
    let pipeline = &config.pipeline;
    let session_id = Uuid::new_v4();

    let seed = store
        .store()
        .top_tokens(pipeline.seed_percentile)
        .context("failed to seed bank")?;
    let mut bank = TokenBank::from_tokens(seed.into_iter().map(|(t, _)| t), pipeline.bank_mode());
    let seeded = bank.len();

    let emissions = segment(&text_symbols(text), &mut bank);
    let mut graph = AdjacencyGraph::from_emissions(&emissions, session_id);

    if let Some(k) = trim_k {
        let evicted = trim(&mut graph, k);
        bank.remove_all(&evicted);
        tracing::info!(%session_id, evicted = evicted.len(), "trimmed document graph");
    }

    let edges = graph.edges_in_sequence();
    let pushed = tg_store::push(store, &edges, pipeline.batch_size)?;
    tracing::info!(
        %session_id,
        seeded,
        tokens = emissions.len(),
        bank = bank.len(),
        pushed,
        "document ingested"
    );
    Ok(session_id)
}

fn cmd_top(config: &Config, percentile: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&percentile) {
        bail!("--percentile must be within 0..=1, got {percentile}");
    }
    let store = open_store(config)?;
    let ranked = store
        .store()
        .top_tokens(percentile)
        .context("failed to rank stored graph")?;

    if ranked.is_empty() {
        println!("(store is empty)");
        return Ok(());
    }
    for (token, rank) in ranked {
        println!("{rank:.6}\t{:?}", token.to_text_lossy());
    }
    Ok(())
}

fn cmd_reconstruct(config: &Config, session_id: Uuid) -> Result<()> {
    let store = open_store(config)?;
    let tokens = store.store().session_tokens(session_id)?;
    if tokens.is_empty() {
        bail!("no stored edges for session {session_id}");
    }

    let mut out = std::io::stdout().lock();
    for token in &tokens {
        write!(out, "{}", token.to_text_lossy())?;
    }
    out.flush()?;
    Ok(())
}

fn cmd_stats(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let guard = store.store();
    let stats = guard.stats()?;
    let sessions = guard.sessions()?;
    let tokens = guard.ranked_tokens(usize::MAX)?;
    let profile = BankProfile::of(tokens.iter().map(|(t, _)| t));
    let path = config.store_path();

    if json {
        let sessions: Vec<_> = sessions
            .iter()
            .map(|(id, edges)| serde_json::json!({ "session_id": id, "edges": edges }))
            .collect();
        let value = serde_json::json!({
            "store": path_str(&path),
            "tokens": stats.tokens,
            "edges": stats.edges,
            "sessions": stats.sessions,
            "db_size_bytes": stats.db_size_bytes,
            "rank_runs": stats.rank_runs,
            "last_rank_iterations": stats.last_rank_iterations,
            "profile": profile,
            "per_session": sessions,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Store:    {}", path.display());
    println!("Tokens:   {}", stats.tokens);
    println!("Edges:    {}", stats.edges);
    println!("Sessions: {}", stats.sessions);
    println!("DB size:  {} bytes", stats.db_size_bytes);
    match stats.last_rank_iterations {
        Some(iterations) => println!(
            "Ranked:   {} runs, last took {iterations} iterations",
            stats.rank_runs
        ),
        None => println!("Ranked:   never"),
    }
    println!(
        "Token length: mean={:.2}, std={:.2}, max={}",
        profile.mean_len, profile.std_len, profile.max_len
    );
    for (id, edges) in sessions {
        println!("  {id}  {edges} edges");
    }
    Ok(())
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}
