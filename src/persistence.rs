//! Durable storage for the analysis cache
//!
//! The cache is one versioned JSON document kept in a [`BlobStore`], plus
//! a plain graph snapshot for read-only consumers. Writes go through a
//! debounced background task: bursts of mutations collapse into a single
//! write, and each write serializes a deep copy taken at write time.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::Result;
use crate::schema::{CrossFileEdge, FileCacheEntry, Graph, WorkflowSummary};

// ============================================================================
// Blob storage
// ============================================================================

/// Minimal key/value byte storage
pub trait BlobStore: Send + Sync {
    /// `Ok(None)` when the key does not exist
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Blobs as files under one directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let target = self.path_for(key);
        let temp = self.root.join(format!(".{}.tmp", key));
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process blobs, for tests and ephemeral caches
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// Persisted document
// ============================================================================

/// On-disk layout of the whole cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCache {
    pub version: u32,
    #[serde(default)]
    pub files: BTreeMap<String, FileCacheEntry>,
    #[serde(default)]
    pub cross_file_edges: Vec<CrossFileEdge>,
    /// Last computed workflows, informational only
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowSummary>,
}

/// Just enough of the document to check its version
#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default)]
    version: Option<u32>,
}

impl PersistedCache {
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            files: BTreeMap::new(),
            cross_file_edges: Vec::new(),
            workflows: BTreeMap::new(),
        }
    }

    /// Load the document, or an empty cache
    ///
    /// A missing blob, unreadable or malformed content, and a version other
    /// than `version` all yield an empty cache at `version`.
    pub fn load(blob: &dyn BlobStore, key: &str, version: u32) -> Self {
        let bytes = match blob.read(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Self::empty(version),
            Err(e) => {
                tracing::warn!("[PERSIST] Could not read {}: {}; starting empty", key, e);
                return Self::empty(version);
            }
        };

        match serde_json::from_slice::<VersionProbe>(&bytes) {
            Ok(probe) if probe.version == Some(version) => {}
            Ok(probe) => {
                tracing::info!(
                    "[PERSIST] Discarding cache at version {:?} (expected {})",
                    probe.version,
                    version
                );
                return Self::empty(version);
            }
            Err(e) => {
                tracing::warn!("[PERSIST] Malformed cache {}: {}; starting empty", key, e);
                return Self::empty(version);
            }
        }

        match serde_json::from_slice::<PersistedCache>(&bytes) {
            Ok(doc) => {
                tracing::info!(
                    "[PERSIST] Loaded {} files, {} cross-file edges",
                    doc.files.len(),
                    doc.cross_file_edges.len()
                );
                doc
            }
            Err(e) => {
                tracing::warn!("[PERSIST] Malformed cache {}: {}; starting empty", key, e);
                Self::empty(version)
            }
        }
    }
}

// ============================================================================
// Debounced writer
// ============================================================================

/// What needs writing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub cache: bool,
    pub snapshot: bool,
}

impl Dirty {
    pub const CACHE: Dirty = Dirty {
        cache: true,
        snapshot: false,
    };
    pub const ALL: Dirty = Dirty {
        cache: true,
        snapshot: true,
    };

    pub fn any(self) -> bool {
        self.cache || self.snapshot
    }

    fn union(self, other: Dirty) -> Dirty {
        Dirty {
            cache: self.cache || other.cache,
            snapshot: self.snapshot || other.snapshot,
        }
    }
}

/// Deep copies handed to the writer
#[derive(Debug, Default)]
pub struct WriteSet {
    pub cache: Option<PersistedCache>,
    pub snapshot: Option<Graph>,
}

/// Produces a [`WriteSet`] for the dirty parts, at write time
pub type SnapshotSource = Arc<dyn Fn(Dirty) -> WriteSet + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub cache_key: String,
    pub snapshot_key: String,
    pub debounce: Duration,
    pub max_wait: Duration,
}

enum WriterMessage {
    Dirty(Dirty),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background writer task
///
/// Dropping every handle lets the task write anything still pending and
/// exit.
#[derive(Clone)]
pub struct PersistenceHandle {
    sender: mpsc::UnboundedSender<WriterMessage>,
}

impl PersistenceHandle {
    /// Spawn the writer on the current tokio runtime
    pub fn spawn(blob: Arc<dyn BlobStore>, source: SnapshotSource, config: WriterConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(receiver, blob, source, config));
        Self { sender }
    }

    /// Schedule a write
    pub fn mark_dirty(&self, dirty: Dirty) {
        // Ignore send errors - the writer is gone only at shutdown
        let _ = self.sender.send(WriterMessage::Dirty(dirty));
    }

    /// Write anything pending now and wait for it
    pub async fn flush(&self) {
        let (reply, done) = oneshot::channel();
        if self.sender.send(WriterMessage::Flush(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_writer(
    mut receiver: mpsc::UnboundedReceiver<WriterMessage>,
    blob: Arc<dyn BlobStore>,
    source: SnapshotSource,
    config: WriterConfig,
) {
    let mut dirty = Dirty::default();
    let mut first_change: Option<Instant> = None;
    let mut last_change: Option<Instant> = None;

    loop {
        let deadline = match (first_change, last_change) {
            (Some(first), Some(last)) => Some((last + config.debounce).min(first + config.max_wait)),
            _ => None,
        };

        let message = match deadline {
            Some(deadline) => {
                tokio::select! {
                    message = receiver.recv() => message,
                    _ = tokio::time::sleep_until(deadline) => {
                        write_now(&blob, &source, &config, std::mem::take(&mut dirty)).await;
                        first_change = None;
                        last_change = None;
                        continue;
                    }
                }
            }
            None => receiver.recv().await,
        };

        match message {
            Some(WriterMessage::Dirty(change)) => {
                let now = Instant::now();
                dirty = dirty.union(change);
                first_change.get_or_insert(now);
                last_change = Some(now);
            }
            Some(WriterMessage::Flush(reply)) => {
                write_now(&blob, &source, &config, std::mem::take(&mut dirty)).await;
                first_change = None;
                last_change = None;
                let _ = reply.send(());
            }
            None => {
                write_now(&blob, &source, &config, dirty).await;
                tracing::debug!("[PERSIST] Writer stopped");
                break;
            }
        }
    }
}

async fn write_now(blob: &Arc<dyn BlobStore>, source: &SnapshotSource, config: &WriterConfig, dirty: Dirty) {
    if !dirty.any() {
        return;
    }

    let set = source(dirty);
    let blob = Arc::clone(blob);
    let config = config.clone();

    let written = tokio::task::spawn_blocking(move || write_set(blob.as_ref(), &config, set)).await;
    match written {
        Ok(Ok(bytes)) => tracing::debug!("[PERSIST] Wrote {} bytes", bytes),
        Ok(Err(e)) => tracing::warn!("[PERSIST] Write failed: {}", e),
        Err(e) => tracing::warn!("[PERSIST] Write task failed: {}", e),
    }
}

/// Serialize and store a write set; returns the bytes written
pub fn write_set(blob: &dyn BlobStore, config: &WriterConfig, set: WriteSet) -> Result<usize> {
    let mut written = 0;
    if let Some(cache) = set.cache {
        let bytes = serde_json::to_vec(&cache)?;
        blob.write(&config.cache_key, &bytes)?;
        written += bytes.len();
    }
    if let Some(snapshot) = set.snapshot {
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        blob.write(&config.snapshot_key, &bytes)?;
        written += bytes.len();
    }
    Ok(written)
}
