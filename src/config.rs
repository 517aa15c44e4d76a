//! Cache configuration.
//!
//! Read from `<cache dir>/config.toml` when present. Every field has a
//! default, so an empty or partial file is valid.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CodagError, Result};

/// Current on-disk cache document version.
///
/// 1 - Initial per-file cache
/// 2 - Cross-file edges stored separately from file entries
pub const CACHE_VERSION: u32 = 2;

/// Tuning knobs for the analysis cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Expected version of the persisted cache document
    #[serde(default = "default_cache_version")]
    pub cache_version: u32,

    /// Quiet period before a pending write is flushed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on how long a pending write may be deferred
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Distinct workflows that must enter a file before it is a hub
    #[serde(default = "default_hub_threshold")]
    pub hub_threshold: usize,

    /// Iteration cap for workflow label propagation
    #[serde(default = "default_propagation_iterations")]
    pub propagation_iterations: usize,

    /// Blob key of the persisted cache document
    #[serde(default = "default_cache_key")]
    pub cache_key: String,

    /// Blob key of the plain graph snapshot
    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: String,
}

fn default_cache_version() -> u32 {
    CACHE_VERSION
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_max_wait_ms() -> u64 {
    5_000
}

fn default_hub_threshold() -> usize {
    2
}

fn default_propagation_iterations() -> usize {
    20
}

fn default_cache_key() -> String {
    "analysis-cache.json".to_string()
}

fn default_snapshot_key() -> String {
    "graph.json".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_version: default_cache_version(),
            debounce_ms: default_debounce_ms(),
            max_wait_ms: default_max_wait_ms(),
            hub_threshold: default_hub_threshold(),
            propagation_iterations: default_propagation_iterations(),
            cache_key: default_cache_key(),
            snapshot_key: default_snapshot_key(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a specific path, falling back to defaults
    /// when the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CodagError::ConfigError {
            message: format!("Failed to parse config: {}", e),
        })
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms.max(self.debounce_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_version, CACHE_VERSION);
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.max_wait(), Duration::from_secs(5));
        assert_eq!(config.propagation_iterations, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CacheConfig::from_toml("hub_threshold = 3\ndebounce_ms = 50\n").unwrap();
        assert_eq!(config.hub_threshold, 3);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.max_wait_ms, 5_000);
        assert_eq!(config.cache_key, "analysis-cache.json");
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = CacheConfig::from_toml("hub_threshold = \"many\"").unwrap_err();
        assert!(matches!(err, CodagError::ConfigError { .. }));
    }

    #[test]
    fn test_max_wait_never_below_debounce() {
        let config = CacheConfig {
            debounce_ms: 800,
            max_wait_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.max_wait(), Duration::from_millis(800));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, CacheConfig::default());
    }
}
