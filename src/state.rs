//! The analysis cache façade
//!
//! [`AnalysisCache`] owns the per-file store, the cross-file registry and
//! the remembered extractions behind one `parking_lot` mutex. Every public
//! operation takes that lock for its whole critical section, so stores,
//! merges and workflow computations never interleave. Hashing and
//! extraction run before the lock is taken.
//!
//! # Sessions
//!
//! A session counter is bumped by [`AnalysisCache::clear`]. Analysis runs
//! capture it in [`AnalysisCache::begin_analysis`]; a batch that arrives
//! after a clear is discarded with [`CodagError::StaleSession`].
//!
//! While any batch of any run is outstanding, merged graphs are returned
//! unfiltered.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;

use crate::callgraph::{diff, extract_call_graph, FileCallGraph};
use crate::config::CacheConfig;
use crate::error::{CodagError, Result};
use crate::fingerprint::{content_hash, fingerprint, hash_extracted};
use crate::local_update::{
    baseline_from_entry, baseline_from_functions, function_calls, LocalUpdateApplier, LocalUpdateOutcome,
};
use crate::merge::{narrow_to_paths, MergedGraph, MergedGraphBuilder};
use crate::paths::normalize_path;
use crate::persistence::{
    BlobStore, Dirty, PersistedCache, PersistenceHandle, SnapshotSource, WriteSet, WriterConfig,
};
use crate::schema::{AnalysisResult, Graph, Node, WorkflowSummary};
use crate::store::{CrossFileEdgeRegistry, FileAnalysisStore, StoredBatch};

/// Handle for one multi-batch analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisSession {
    /// Session counter captured at the start of the run
    pub generation: u64,
    pub expected_batches: usize,
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub files: usize,
    pub nodes: usize,
    pub cross_file_edges: usize,
    pub outstanding_batches: usize,
    pub pending_enrichment: usize,
    pub session: u64,
}

/// A node awaiting a description
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingNode {
    pub file: String,
    pub node: Node,
}

#[derive(Default)]
struct CacheState {
    store: FileAnalysisStore,
    registry: CrossFileEdgeRegistry,
    /// Last extraction per file, the baseline for local diffs
    baselines: BTreeMap<String, FileCallGraph>,
    outstanding_batches: usize,
    /// Full merge, valid until the next mutation
    merged: Option<MergedGraph>,
    /// Workflows of the last full merge, persisted for external readers
    workflows: BTreeMap<String, WorkflowSummary>,
    snapshot: Option<Graph>,
}

impl CacheState {
    fn invalidate_merge(&mut self) {
        self.merged = None;
    }

    /// Forget symbol-to-symbol edges no cached file still reaches
    fn purge_detached_symbols(&mut self) {
        let defined = self.store.symbol_ids();
        self.registry.purge_detached_symbol_edges(&defined);
    }

    fn document(&self, version: u32) -> PersistedCache {
        PersistedCache {
            version,
            files: self.store.entries().clone(),
            cross_file_edges: self.registry.to_vec(),
            workflows: self.workflows.clone(),
        }
    }
}

pub struct AnalysisCache {
    state: Arc<Mutex<CacheState>>,
    session: AtomicU64,
    config: CacheConfig,
    persistence: Option<PersistenceHandle>,
}

impl AnalysisCache {
    /// Cache with no durable storage
    pub fn in_memory(config: CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            session: AtomicU64::new(0),
            config,
            persistence: None,
        }
    }

    /// Load the cache from `blob` and start the debounced writer
    ///
    /// Must be called from within a tokio runtime. A missing, malformed or
    /// outdated document yields an empty cache.
    pub fn open(blob: Arc<dyn BlobStore>, config: CacheConfig) -> Self {
        let doc = PersistedCache::load(blob.as_ref(), &config.cache_key, config.cache_version);
        let state = CacheState {
            store: FileAnalysisStore::from_entries(doc.files),
            registry: CrossFileEdgeRegistry::from_edges(doc.cross_file_edges),
            workflows: doc.workflows,
            ..Default::default()
        };
        let state = Arc::new(Mutex::new(state));

        let handle = PersistenceHandle::spawn(
            blob,
            snapshot_source(Arc::downgrade(&state), config.cache_version),
            WriterConfig {
                cache_key: config.cache_key.clone(),
                snapshot_key: config.snapshot_key.clone(),
                debounce: config.debounce(),
                max_wait: config.max_wait(),
            },
        );

        Self {
            state,
            session: AtomicU64::new(0),
            config,
            persistence: Some(handle),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self, dirty: Dirty) {
        if let Some(handle) = &self.persistence {
            handle.mark_dirty(dirty);
        }
    }

    /// Write anything pending and wait for it
    pub async fn flush(&self) {
        if let Some(handle) = &self.persistence {
            handle.flush().await;
        }
    }

    // ========== Validity ==========

    /// Whether the cached entry for `path` was computed from content with
    /// this hash
    pub fn is_file_valid(&self, path: &str, hash: &str) -> bool {
        self.state.lock().store.is_valid(path, hash)
    }

    /// The hash `is_file_valid` expects for this content
    pub fn file_hash(&self, path: &str, content: &str) -> String {
        content_hash(path, content)
    }

    /// Files whose content no longer matches their entry (or has none)
    pub fn files_needing_analysis(&self, contents: &BTreeMap<String, String>) -> Vec<String> {
        let hashes: Vec<(String, String)> = contents
            .par_iter()
            .map(|(path, content)| (normalize_path(path), content_hash(path, content)))
            .collect();

        let state = self.state.lock();
        hashes
            .into_iter()
            .filter(|(path, hash)| !state.store.is_valid(path, hash))
            .map(|(path, _)| path)
            .collect()
    }

    // ========== Analysis runs ==========

    /// Register a run of `expected_batches` batches
    pub fn begin_analysis(&self, expected_batches: usize) -> AnalysisSession {
        let mut state = self.state.lock();
        state.outstanding_batches += expected_batches;
        state.invalidate_merge();
        AnalysisSession {
            generation: self.session(),
            expected_batches,
        }
    }

    /// Drop a failed batch; stored sibling batches stay valid
    pub fn fail_batch(&self, session: &AnalysisSession) {
        let mut state = self.state.lock();
        if session.generation != self.session() {
            return;
        }
        state.outstanding_batches = state.outstanding_batches.saturating_sub(1);
        state.invalidate_merge();
        tracing::warn!(
            "[STORE] Batch failed; {} batches still outstanding",
            state.outstanding_batches
        );
    }

    /// Store one batch outside any registered run
    pub fn store(&self, result: &AnalysisResult, contents: &BTreeMap<String, String>) -> Result<StoredBatch> {
        let session = self.begin_analysis(1);
        self.store_batch(&session, result, contents)
    }

    /// Store one batch of a run
    ///
    /// `contents` maps each analyzed file to the text the analyzer saw.
    pub fn store_batch(
        &self,
        session: &AnalysisSession,
        result: &AnalysisResult,
        contents: &BTreeMap<String, String>,
    ) -> Result<StoredBatch> {
        let fingerprints: Vec<(String, String, Option<FileCallGraph>)> = contents
            .par_iter()
            .map(|(path, content)| {
                let key = normalize_path(path);
                let fp = fingerprint(&key, content);
                (key, fp.hash, fp.call_graph)
            })
            .collect();

        let mut state = self.state.lock();
        let current = self.session();
        if session.generation != current {
            tracing::info!(
                "[STORE] Discarding batch from session {} (now {})",
                session.generation,
                current
            );
            return Err(CodagError::StaleSession {
                captured: session.generation,
                current,
            });
        }

        let hashes: BTreeMap<String, String> = fingerprints
            .iter()
            .map(|(key, hash, _)| (key.clone(), hash.clone()))
            .collect();

        let state = &mut *state;
        let batch = state.store.store(result, &hashes);
        state
            .registry
            .replace_for_files(&batch.files, batch.cross_file_edges.clone());
        state.purge_detached_symbols();

        for (key, _, graph) in fingerprints {
            let Some(graph) = graph else {
                state.baselines.remove(&key);
                continue;
            };
            if let Some(entry) = state.store.get_mut(&key) {
                entry.functions = function_calls(&graph);
            }
            state.baselines.insert(key, graph);
        }

        state.outstanding_batches = state.outstanding_batches.saturating_sub(1);
        state.invalidate_merge();
        self.mark_dirty(Dirty::CACHE);
        Ok(batch)
    }

    // ========== Reads ==========

    /// The merged graph, optionally narrowed to some files
    ///
    /// Unfiltered while batches are outstanding. A fresh full merge
    /// refreshes the persisted workflow summaries and the graph snapshot.
    pub fn get_merged_graph(&self, paths: &[String]) -> Graph {
        let mut state = self.state.lock();
        let deferred = state.outstanding_batches > 0;

        let reusable = state
            .merged
            .as_ref()
            .is_some_and(|m| m.stats.filtered == !deferred);
        if !reusable {
            let merged = MergedGraphBuilder::new(&state.store, &state.registry, &self.config)
                .unfiltered(deferred)
                .build();
            state.workflows = merged
                .graph
                .workflows
                .iter()
                .map(|w| (w.id.clone(), WorkflowSummary::from(w)))
                .collect();
            state.snapshot = Some(merged.graph.clone());
            state.merged = Some(merged);
            self.mark_dirty(Dirty::ALL);
        }

        match state.merged.as_ref() {
            Some(merged) if paths.is_empty() => merged.graph.clone(),
            Some(merged) => narrow_to_paths(merged, paths).graph,
            None => Graph::default(),
        }
    }

    // ========== Mutations ==========

    /// Forget one file; returns whether it was cached
    pub fn invalidate_file(&self, path: &str) -> bool {
        let key = normalize_path(path);
        let mut state = self.state.lock();
        let existed = state.store.invalidate(&key);
        let files: BTreeSet<String> = [key.clone()].into_iter().collect();
        let purged = state.registry.purge_files(&files);
        state.purge_detached_symbols();
        state.baselines.remove(&key);
        if existed || purged > 0 {
            state.invalidate_merge();
            self.mark_dirty(Dirty::CACHE);
        }
        existed
    }

    /// Drop everything and start a new session
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        *state = CacheState {
            snapshot: Some(Graph::default()),
            ..Default::default()
        };
        tracing::info!("[STORE] Cache cleared, session {}", session);
        self.mark_dirty(Dirty::ALL);
    }

    /// Remove entries for files not in `existing`; returns the removed keys
    pub fn prune_stale(&self, existing: &BTreeSet<String>) -> Vec<String> {
        let mut state = self.state.lock();
        let stale = state.store.prune_stale(existing);
        if stale.is_empty() {
            return Vec::new();
        }
        state.registry.purge_files(&stale);
        state.purge_detached_symbols();
        for key in &stale {
            state.baselines.remove(key);
        }
        state.invalidate_merge();
        self.mark_dirty(Dirty::CACHE);
        tracing::info!("[STORE] Pruned {} stale files", stale.len());
        stale.into_iter().collect()
    }

    /// Patch a cached file from its new content, without the analyzer
    ///
    /// Diffs the new extraction against the last one seen for the file:
    /// in memory, else the callee map persisted on its entry, else a
    /// baseline rebuilt from the entry's nodes and edges.
    pub fn apply_local_update(&self, path: &str, content: &str) -> Result<LocalUpdateOutcome> {
        let key = normalize_path(path);
        let graph = extract_call_graph(&key, content)?;
        let (hash, _) = hash_extracted(Some(&graph), content);

        let mut state = self.state.lock();
        let state = &mut *state;
        let entry = state
            .store
            .get(&key)
            .ok_or_else(|| CodagError::FileNotFound { path: key.clone() })?;

        let baseline = match state.baselines.get(&key) {
            Some(baseline) => baseline.clone(),
            None => baseline_from_functions(entry).unwrap_or_else(|| {
                tracing::debug!("[LOCAL] No recorded call graph for {}, rebuilding from nodes", key);
                baseline_from_entry(&key, entry, &state.registry)
            }),
        };
        let changes = diff(&baseline, &graph);

        let outcome =
            LocalUpdateApplier::new(&mut state.store, &mut state.registry).apply(&key, &changes, &graph, &hash)?;
        state.baselines.insert(key, graph);
        state.invalidate_merge();
        self.mark_dirty(Dirty::CACHE);
        Ok(outcome)
    }

    // ========== Enrichment ==========

    /// Nodes created by local updates that still need a description
    ///
    /// Taking them clears the queue; a failed description pass simply
    /// leaves them undescribed.
    pub fn take_pending_enrichment(&self) -> Vec<PendingNode> {
        let mut state = self.state.lock();
        let keys: Vec<String> = state.store.entries().keys().cloned().collect();
        let mut pending = Vec::new();
        for key in keys {
            let Some(entry) = state.store.get_mut(&key) else { continue };
            let ids = std::mem::take(&mut entry.pending_enrichment);
            for id in ids {
                if let Some(node) = entry.node(&id) {
                    pending.push(PendingNode {
                        file: key.clone(),
                        node: node.clone(),
                    });
                }
            }
        }
        if !pending.is_empty() {
            self.mark_dirty(Dirty::CACHE);
        }
        pending
    }

    /// Attach descriptions by node id; returns how many nodes changed
    pub fn apply_enrichment(&self, descriptions: &BTreeMap<String, String>) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = state.store.entries().keys().cloned().collect();
        let mut applied = 0;
        for key in keys {
            let Some(entry) = state.store.get_mut(&key) else { continue };
            for node in entry.nodes.iter_mut() {
                if let Some(description) = descriptions.get(&node.id) {
                    node.description = Some(description.clone());
                    entry.pending_enrichment.remove(&node.id);
                    applied += 1;
                }
            }
        }
        if applied > 0 {
            state.invalidate_merge();
            self.mark_dirty(Dirty::CACHE);
        }
        applied
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            files: state.store.len(),
            nodes: state.store.node_count(),
            cross_file_edges: state.registry.len(),
            outstanding_batches: state.outstanding_batches,
            pending_enrichment: state
                .store
                .entries()
                .values()
                .map(|e| e.pending_enrichment.len())
                .sum(),
            session: self.session(),
        }
    }
}

/// Deep copies of the dirty parts, taken under the lock at write time
fn snapshot_source(state: Weak<Mutex<CacheState>>, version: u32) -> SnapshotSource {
    Arc::new(move |dirty: Dirty| {
        let Some(state) = state.upgrade() else {
            return WriteSet::default();
        };
        let state = state.lock();
        WriteSet {
            cache: dirty.cache.then(|| state.document(version)),
            snapshot: if dirty.snapshot { state.snapshot.clone() } else { None },
        }
    })
}
