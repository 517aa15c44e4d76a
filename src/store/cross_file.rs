//! Cross-file edge registry
//!
//! Edges whose endpoints live in different files are kept apart from the
//! per-file entries: when such an edge arrives, its far endpoint may not
//! have been analyzed yet. Edges between two bare symbols live here too,
//! with no file on either side. The registry is reconciled against the live
//! node set at read time.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::CrossFileEdge;

#[derive(Debug, Clone, Default)]
pub struct CrossFileEdgeRegistry {
    /// Keyed by `sourceFile:sourceId->targetFile:targetId`
    edges: BTreeMap<String, CrossFileEdge>,
}

impl CrossFileEdgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted list, applying the usual conflict rule
    pub fn from_edges(edges: Vec<CrossFileEdge>) -> Self {
        let mut registry = Self::new();
        registry.merge(edges);
        registry
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Edges in key order
    pub fn iter(&self) -> impl Iterator<Item = &CrossFileEdge> {
        self.edges.values()
    }

    pub fn to_vec(&self) -> Vec<CrossFileEdge> {
        self.edges.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    /// Merge incoming edges; on a key collision the newer timestamp wins
    ///
    /// Returns the number of edges inserted or replaced.
    pub fn merge(&mut self, incoming: Vec<CrossFileEdge>) -> usize {
        let mut changed = 0;
        for edge in incoming {
            if edge.source_node_id == edge.target_node_id {
                continue;
            }
            let key = edge.key();
            match self.edges.get(&key) {
                Some(existing) if existing.timestamp >= edge.timestamp => {}
                _ => {
                    self.edges.insert(key, edge);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Drop every edge produced by analysis of `files`
    ///
    /// That is, edges whose source lives in one of the files, plus edges
    /// from a symbolic source (empty `sourceFile`) into one of the files.
    pub fn purge_files(&mut self, files: &BTreeSet<String>) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, e| {
            let produced_by_batch = files.contains(&e.source_file)
                || (e.source_file.is_empty() && files.contains(&e.target_file));
            !produced_by_batch
        });
        before - self.edges.len()
    }

    /// Drop edges between two bare symbols that no cached file reaches
    ///
    /// A symbol is reached when a file entry defines it (`defined`) or an
    /// edge anchored in a file touches it; reach spreads along symbol
    /// edges. Returns the number of edges dropped.
    pub fn purge_detached_symbol_edges(&mut self, defined: &BTreeSet<String>) -> usize {
        let mut reached: BTreeSet<String> = defined.clone();
        for edge in self.edges.values().filter(|e| !e.is_between_symbols()) {
            if edge.source_file.is_empty() {
                reached.insert(edge.source_node_id.clone());
            }
            if edge.target_file.is_empty() {
                reached.insert(edge.target_node_id.clone());
            }
        }

        loop {
            let before = reached.len();
            for edge in self.edges.values().filter(|e| e.is_between_symbols()) {
                if reached.contains(&edge.source_node_id) || reached.contains(&edge.target_node_id) {
                    reached.insert(edge.source_node_id.clone());
                    reached.insert(edge.target_node_id.clone());
                }
            }
            if reached.len() == before {
                break;
            }
        }

        let before = self.edges.len();
        self.edges
            .retain(|_, e| !e.is_between_symbols() || reached.contains(&e.source_node_id));
        let dropped = before - self.edges.len();
        if dropped > 0 {
            tracing::debug!("[STORE] Dropped {} detached symbol edges", dropped);
        }
        dropped
    }

    /// Purge the batch's files, then merge the batch's edges
    pub fn replace_for_files(&mut self, files: &BTreeSet<String>, incoming: Vec<CrossFileEdge>) {
        let purged = self.purge_files(files);
        let merged = self.merge(incoming);
        tracing::debug!(
            "[STORE] Cross-file edges: purged {} for {} files, merged {}",
            purged,
            files.len(),
            merged
        );
    }

    /// Drop edges touching any of the given node ids
    pub fn remove_node_edges(&mut self, node_ids: &BTreeSet<String>) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, e| {
            !node_ids.contains(&e.source_node_id) && !node_ids.contains(&e.target_node_id)
        });
        before - self.edges.len()
    }

    /// Drop the edge between two node ids, whatever files it was filed under
    pub fn remove_between(&mut self, source_id: &str, target_id: &str) -> bool {
        let before = self.edges.len();
        self.edges
            .retain(|_, e| !(e.source_node_id == source_id && e.target_node_id == target_id));
        before != self.edges.len()
    }

    /// Edges touching a node id
    pub fn edges_of<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a CrossFileEdge> {
        self.edges
            .values()
            .filter(move |e| e.source_node_id == node_id || e.target_node_id == node_id)
    }
}
