use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration for the brain and its subsystems.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    /// Directory holding the three persisted JSON documents.
    pub storage_dir: PathBuf,

    /// Maximum entries the memory store holds before value-aware eviction.
    pub memory_capacity: usize,

    /// Time constant (days) for the exponential recency decay used by both
    /// eviction scoring and recall re-ranking.
    pub recency_decay_days: f64,

    /// Embedding input is truncated to this many characters before
    /// submission to the provider.
    pub embed_input_limit: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".engram"),
            memory_capacity: 1000,
            recency_decay_days: 30.0,
            embed_input_limit: 8000,
        }
    }
}

impl BrainConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: BrainConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults
    /// with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ENGRAM_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ENGRAM_MEMORY_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.memory_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("ENGRAM_RECENCY_DECAY_DAYS") {
            if let Ok(n) = v.parse() {
                self.recency_decay_days = n;
            }
        }
        if let Ok(v) = std::env::var("ENGRAM_EMBED_INPUT_LIMIT") {
            if let Ok(n) = v.parse() {
                self.embed_input_limit = n;
            }
        }
    }
}
