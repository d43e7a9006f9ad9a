//! `tg.toml` and the data directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use tg_core::{BATCH_SIZE, BankMode, PUSH_THRESHOLD, SEED_PERCENTILE, TRIM_K};

pub const CONFIG_FILE: &str = "tg.toml";
pub const STORE_FILE: &str = "tokens.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; defaults to `tokens.db` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Per-session settings, handed to every session at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Unpushed edges that trigger a background push.
    #[serde(default = "default_push_threshold")]
    pub push_threshold: usize,

    /// Edges per store transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Share of top-ranked store tokens a reseed loads.
    #[serde(default = "default_seed_percentile")]
    pub seed_percentile: f64,

    /// Reseed the bank when a session opens.
    #[serde(default = "default_true")]
    pub seed_on_start: bool,

    /// Reseed the bank after each successful push.
    #[serde(default = "default_true")]
    pub refresh_after_push: bool,

    /// Keep emission start positions in the bank.
    #[serde(default)]
    pub track_positions: bool,

    /// Trim the session graph once it holds more keys than this. 0 disables.
    #[serde(default)]
    pub trim_max_tokens: usize,

    #[serde(default = "default_trim_k")]
    pub trim_k: f64,

    /// Log per-drain detail at info level.
    #[serde(default)]
    pub verbose: bool,
}

fn default_push_threshold() -> usize {
    PUSH_THRESHOLD
}

fn default_batch_size() -> usize {
    BATCH_SIZE
}

fn default_seed_percentile() -> f64 {
    SEED_PERCENTILE
}

fn default_trim_k() -> f64 {
    TRIM_K
}

fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            push_threshold: default_push_threshold(),
            batch_size: default_batch_size(),
            seed_percentile: default_seed_percentile(),
            seed_on_start: true,
            refresh_after_push: true,
            track_positions: false,
            trim_max_tokens: 0,
            trim_k: default_trim_k(),
            verbose: false,
        }
    }
}

impl PipelineConfig {
    pub fn bank_mode(&self) -> BankMode {
        if self.track_positions {
            BankMode::Tracking
        } else {
            BankMode::Compact
        }
    }

    /// A config that never reseeds, for deterministic segmentation.
    #[cfg(test)]
    pub fn without_reseed(mut self) -> Self {
        self.seed_on_start = false;
        self.refresh_after_push = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("pipeline.batch_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.seed_percentile) {
            bail!(
                "pipeline.seed_percentile must be within 0..=1, got {}",
                self.seed_percentile
            );
        }
        if !self.trim_k.is_finite() {
            bail!("pipeline.trim_k must be finite");
        }
        Ok(())
    }
}

impl Config {
    /// Load from an explicit path (must exist), or from `tg.toml` in the
    /// data directory if present, or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = data_dir().join(CONFIG_FILE);
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    tracing::debug!("no config at {}, using defaults", path.display());
                    Self::default()
                }
            }
        };
        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| data_dir().join(STORE_FILE))
    }
}

/// `TG_DATA_DIR`, else `~/.token-graph`.
pub fn data_dir() -> PathBuf {
    std::env::var("TG_DATA_DIR")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".token-graph"))
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
