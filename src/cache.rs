//! Cache directory management
//!
//! Blobs live under `<workspace>/.codag/` unless `CODAG_CACHE_DIR` points
//! elsewhere. The directory holds the cache document, the graph snapshot
//! and an optional `config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::persistence::FsBlobStore;

/// Environment variable overriding the cache location
pub const CACHE_DIR_ENV: &str = "CODAG_CACHE_DIR";

/// Directory name used inside a workspace
pub const CACHE_DIR_NAME: &str = ".codag";

/// Cache directory for one workspace
#[derive(Debug, Clone)]
pub struct CacheDir {
    /// Root of the cache
    pub root: PathBuf,

    /// Workspace the cache describes
    pub workspace_root: PathBuf,
}

impl CacheDir {
    /// Cache directory for a workspace, honoring `CODAG_CACHE_DIR`
    pub fn for_workspace(workspace: &Path) -> Self {
        let workspace_root = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());
        let root = match std::env::var(CACHE_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => workspace_root.join(CACHE_DIR_NAME),
        };
        Self { root, workspace_root }
    }

    /// Cache directory at an explicit location
    pub fn at(root: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workspace_root: workspace_root.into(),
        }
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.root.exists()
    }

    // ========== Path accessors ==========

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Configuration from `config.toml`, or defaults
    pub fn load_config(&self) -> Result<CacheConfig> {
        CacheConfig::load_from(&self.config_path())
    }

    pub fn blob_store(&self) -> FsBlobStore {
        FsBlobStore::new(&self.root)
    }

    /// Total size of the cache in bytes
    pub fn size(&self) -> u64 {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }

    /// Remove the cache directory
    pub fn clear(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}
