//! Configuration file support.
//!
//! Loads optional `.archgraph/config.toml` from the project root. Every
//! field has a default so a missing or partial file is fine.

use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchConfig {
    /// Worker threads for per-file analysis. 0 means "number of cores".
    pub parallelism: usize,
    /// Override for the cache database location.
    pub cache_dir: Option<String>,
    /// TTL for cached git URL resolutions, in hours.
    pub alias_ttl_hours: i64,
    /// Deadline for external parser subprocesses, in seconds.
    pub subprocess_timeout_secs: u64,
    /// Skip HEAD validation of candidate git URLs entirely.
    pub offline: bool,
}

impl Default for ArchConfig {
    fn default() -> Self {
        ArchConfig {
            parallelism: 0,
            cache_dir: None,
            alias_ttl_hours: 24,
            subprocess_timeout_secs: 30,
            offline: false,
        }
    }
}

impl ArchConfig {
    /// Load configuration from `<root>/.archgraph/config.toml`.
    /// Missing file or unparsable content falls back to defaults.
    pub fn load(root: &Path) -> Self {
        let path = root.join(".archgraph").join("config.toml");
        let Ok(content) = std::fs::read_to_string(&path) else {
            return ArchConfig::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring bad config file");
                ArchConfig::default()
            }
        }
    }

    /// Effective worker count.
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
