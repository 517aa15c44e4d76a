//! Per-file analysis cache
//!
//! One [`FileCacheEntry`] per workspace-relative path. An entry is valid
//! while its stored content hash equals the hash of the file's current
//! content.

use std::collections::{BTreeMap, BTreeSet};

use crate::node_id::NodeId;
use crate::paths::{match_content_key, normalize_path, PathMatch};
use crate::schema::{now_millis, AnalysisResult, CrossFileEdge, FileCacheEntry, Node, SourceLocation};

/// Outcome of storing one analyzer batch
#[derive(Debug, Clone, Default)]
pub struct StoredBatch {
    /// Content keys written (one entry each, possibly empty)
    pub files: BTreeSet<String>,
    pub nodes_stored: usize,
    /// Nodes whose file matched no content key
    pub nodes_dropped: usize,
    /// Bare-symbol nodes (no file) in the batch
    pub symbolic_nodes: usize,
    pub internal_edges: usize,
    /// Edges crossing file boundaries, for the registry
    pub cross_file_edges: Vec<CrossFileEdge>,
}

#[derive(Debug, Clone, Default)]
pub struct FileAnalysisStore {
    files: BTreeMap<String, FileCacheEntry>,
}

impl FileAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(files: BTreeMap<String, FileCacheEntry>) -> Self {
        let files = files
            .into_iter()
            .map(|(path, entry)| (normalize_path(&path), entry))
            .collect();
        Self { files }
    }

    pub fn entries(&self) -> &BTreeMap<String, FileCacheEntry> {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.files.values().map(|e| e.nodes.len()).sum()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Whether the stored entry for `path` was computed from content with
    /// this hash
    pub fn is_valid(&self, path: &str, hash: &str) -> bool {
        self.get(path).map(|e| e.content_hash == hash).unwrap_or(false)
    }

    pub fn get(&self, path: &str) -> Option<&FileCacheEntry> {
        self.files.get(&normalize_path(path))
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileCacheEntry> {
        self.files.get_mut(&normalize_path(path))
    }

    pub fn insert(&mut self, path: &str, entry: FileCacheEntry) {
        self.files.insert(normalize_path(path), entry);
    }

    /// Drop the entry for `path`; returns whether one existed
    pub fn invalidate(&mut self, path: &str) -> bool {
        self.files.remove(&normalize_path(path)).is_some()
    }

    /// Remove entries for files that no longer exist
    pub fn prune_stale(&mut self, existing: &BTreeSet<String>) -> BTreeSet<String> {
        let existing: BTreeSet<String> = existing.iter().map(|p| normalize_path(p)).collect();
        let stale: BTreeSet<String> = self
            .files
            .keys()
            .filter(|k| !existing.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            self.files.remove(key);
        }
        stale
    }

    /// Which file holds a node id
    pub fn file_of(&self, node_id: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(_, e)| e.has_node(node_id))
            .map(|(k, _)| k.as_str())
    }

    /// All cached nodes with their file key, in key order
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.files
            .iter()
            .flat_map(|(k, e)| e.nodes.iter().map(move |n| (k.as_str(), n)))
    }

    /// Bare-symbol definitions, in key order (a symbol may repeat across files)
    pub fn symbols(&self) -> impl Iterator<Item = &Node> {
        self.files.values().flat_map(|e| e.symbols.iter())
    }

    pub fn symbol_ids(&self) -> BTreeSet<String> {
        self.symbols().map(|n| n.id.clone()).collect()
    }

    /// Split an analyzer batch into per-file entries
    ///
    /// `hashes` maps each batch file (its content key) to its content
    /// hash. Nodes are aligned to content keys by exact, relative-suffix,
    /// then full-path-suffix path matching; nodes that match nothing are
    /// dropped. Every batch file gets an entry, even when it has no nodes.
    /// Workflow labels already stored for a file survive unless the batch
    /// relabels the same node.
    ///
    /// Nodes without a file are bare symbols. A symbol that an edge links
    /// to a batch file is kept on that file's entry; one linked only to
    /// other symbols is kept on every batch file. Edges between two symbols
    /// go to the registry with both file fields empty.
    pub fn store(&mut self, result: &AnalysisResult, hashes: &BTreeMap<String, String>) -> StoredBatch {
        let hashes: BTreeMap<String, &String> = hashes
            .iter()
            .map(|(path, hash)| (normalize_path(path), hash))
            .collect();
        let keys: Vec<&str> = hashes.keys().map(String::as_str).collect();
        let timestamp = now_millis();

        let mut batch = StoredBatch::default();
        let mut per_file: BTreeMap<String, FileCacheEntry> = BTreeMap::new();
        let mut node_file: BTreeMap<String, String> = BTreeMap::new();
        let mut symbols: BTreeMap<String, Node> = BTreeMap::new();

        for node in &result.nodes {
            let parsed = NodeId::parse(&node.id).ok();
            let reported = reported_file(node, parsed.as_ref());
            let Some(reported) = reported else {
                let id = node.id.trim().to_string();
                if !symbols.contains_key(&id) {
                    let mut symbol = node.clone();
                    symbol.id = id.clone();
                    symbol.source = None;
                    symbols.insert(id, symbol);
                    batch.symbolic_nodes += 1;
                }
                continue;
            };

            let Some((key, how)) = match_content_key(&reported, keys.iter().copied()) else {
                tracing::debug!(
                    "[STORE] Dropping node {}: {} matches no file in the batch",
                    node.id,
                    reported
                );
                batch.nodes_dropped += 1;
                continue;
            };
            if how != PathMatch::Exact {
                tracing::debug!("[STORE] Matched {} to {} ({:?})", reported, key, how);
            }

            if node_file.contains_key(&node.id) {
                continue;
            }
            node_file.insert(node.id.clone(), key.to_string());

            let entry = per_file
                .entry(key.to_string())
                .or_insert_with(|| FileCacheEntry::new(hashes[key].as_str()));
            entry.nodes.push(locate(node.clone(), key, parsed.as_ref()));
            batch.nodes_stored += 1;
        }

        // Symbol id to the batch files that reference it; `None` marks a
        // symbol seen only on edges to other symbols
        let mut symbol_owners: BTreeMap<String, Option<BTreeSet<String>>> = BTreeMap::new();

        for edge in &result.edges {
            if edge.is_self_loop() {
                continue;
            }
            let source_file = endpoint_file(&edge.source, &node_file, &keys);
            let target_file = endpoint_file(&edge.target, &node_file, &keys);

            for (symbol_end, file_end) in [(&edge.source, &target_file), (&edge.target, &source_file)] {
                let id = symbol_end.trim();
                if !symbols.contains_key(id) {
                    continue;
                }
                let owners = symbol_owners.entry(id.to_string()).or_insert(None);
                if !file_end.is_empty() && hashes.contains_key(file_end) {
                    owners.get_or_insert_with(BTreeSet::new).insert(file_end.clone());
                }
            }

            if source_file.is_empty() && target_file.is_empty() {
                tracing::debug!("[STORE] Edge between symbols {} -> {}", edge.source, edge.target);
            }

            if source_file == target_file && hashes.contains_key(&source_file) {
                let entry = per_file
                    .entry(source_file.clone())
                    .or_insert_with(|| FileCacheEntry::new(hashes[&source_file].as_str()));
                if entry.add_edge(edge.clone()) {
                    batch.internal_edges += 1;
                }
                continue;
            }

            batch.cross_file_edges.push(CrossFileEdge {
                source_file,
                source_node_id: edge.source.clone(),
                target_file,
                target_node_id: edge.target.clone(),
                label: edge.label.clone(),
                timestamp,
            });
        }

        for key in &keys {
            let mut entry = per_file
                .remove(*key)
                .unwrap_or_else(|| FileCacheEntry::new(hashes[*key].as_str()));
            entry.timestamp = timestamp;

            let mut labels: BTreeMap<String, String> = BTreeMap::new();
            if let Some(previous) = self.files.get(*key).and_then(|e| e.workflow_labels.as_ref()) {
                labels.extend(previous.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            for node in &entry.nodes {
                if let Some(label) = result.workflow_hints.get(&node.id) {
                    labels.insert(node.id.clone(), label.clone());
                }
            }
            entry.workflow_labels = if labels.is_empty() { None } else { Some(labels) };

            entry.symbols = symbol_owners
                .iter()
                .filter(|(_, owners)| match owners {
                    Some(files) => files.contains(*key),
                    None => true,
                })
                .filter_map(|(id, _)| symbols.get(id).cloned())
                .collect();

            self.files.insert(key.to_string(), entry);
            batch.files.insert(key.to_string());
        }

        tracing::info!(
            "[STORE] Stored {} files: {} nodes ({} dropped), {} internal edges, {} cross-file edges",
            batch.files.len(),
            batch.nodes_stored,
            batch.nodes_dropped,
            batch.internal_edges,
            batch.cross_file_edges.len()
        );

        batch
    }
}

/// The file a node claims to live in, or `None` for symbolic nodes
fn reported_file(node: &Node, parsed: Option<&NodeId>) -> Option<String> {
    if let Some(source) = &node.source {
        if !source.file.trim().is_empty() {
            return Some(source.file.clone());
        }
    }
    parsed
        .filter(|id| id.has_file_extension())
        .map(|id| id.file().to_string())
}

/// Point a node's source location at its resolved content key
fn locate(mut node: Node, key: &str, parsed: Option<&NodeId>) -> Node {
    match node.source.as_mut() {
        Some(source) => source.file = key.to_string(),
        None => {
            node.source = Some(SourceLocation {
                file: key.to_string(),
                line: parsed.and_then(NodeId::line).unwrap_or(0),
                function: parsed.map(|id| id.function().to_string()),
            });
        }
    }
    node
}

/// File of an edge endpoint: the batch node's file, else the file named in
/// the id, else empty for symbolic endpoints
fn endpoint_file(id: &str, node_file: &BTreeMap<String, String>, keys: &[&str]) -> String {
    if let Some(file) = node_file.get(id) {
        return file.clone();
    }
    match NodeId::parse(id) {
        Ok(parsed) if parsed.has_file_extension() => {
            match match_content_key(parsed.file(), keys.iter().copied()) {
                Some((key, _)) => key.to_string(),
                None => normalize_path(parsed.file()),
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Edge, NodeKind};

    fn hashes(files: &[(&str, &str)]) -> BTreeMap<String, String> {
        files
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect()
    }

    fn node(id: &str, file: &str) -> Node {
        Node::new(id, id, NodeKind::Step).with_source(file, 1, None)
    }

    #[test]
    fn test_store_groups_by_file_and_splits_edges() {
        let mut store = FileAnalysisStore::new();
        let result = AnalysisResult {
            nodes: vec![
                node("a.ts::loadConfig", "a.ts"),
                node("a.ts::parse", "a.ts"),
                node("b.ts::handler", "b.ts"),
            ],
            edges: vec![
                Edge::new("a.ts::loadConfig", "a.ts::parse"),
                Edge::new("b.ts::handler", "a.ts::loadConfig"),
                Edge::new("b.ts::handler", "b.ts::handler"),
            ],
            workflow_hints: BTreeMap::new(),
        };

        let batch = store.store(&result, &hashes(&[("a.ts", "ha"), ("b.ts", "hb")]));
        assert_eq!(batch.nodes_stored, 3);
        assert_eq!(batch.internal_edges, 1);
        assert_eq!(batch.cross_file_edges.len(), 1);
        assert_eq!(batch.cross_file_edges[0].source_file, "b.ts");
        assert_eq!(batch.cross_file_edges[0].target_file, "a.ts");

        assert_eq!(store.get("a.ts").unwrap().nodes.len(), 2);
        assert_eq!(store.get("a.ts").unwrap().internal_edges.len(), 1);
        assert!(store.is_valid("a.ts", "ha"));
        assert!(!store.is_valid("a.ts", "hb"));
    }

    #[test]
    fn test_fuzzy_path_alignment() {
        let mut store = FileAnalysisStore::new();
        let result = AnalysisResult {
            nodes: vec![
                node("client.py::call_llm", "client.py"),
                node("x::y", "/home/dev/proj/backend/main.py"),
                node("other.py::f", "other.py"),
            ],
            edges: vec![],
            workflow_hints: BTreeMap::new(),
        };
        let batch = store.store(
            &result,
            &hashes(&[("backend/client.py", "h1"), ("backend/main.py", "h2")]),
        );

        assert_eq!(batch.nodes_stored, 2);
        assert_eq!(batch.nodes_dropped, 1);
        let client = store.get("backend/client.py").unwrap();
        assert_eq!(client.nodes[0].source.as_ref().unwrap().file, "backend/client.py");
        assert!(store.get("backend/main.py").unwrap().has_node("x::y"));
    }

    #[test]
    fn test_empty_file_gets_explicit_entry() {
        let mut store = FileAnalysisStore::new();
        let batch = store.store(&AnalysisResult::default(), &hashes(&[("empty.ts", "h")]));
        assert!(batch.files.contains("empty.ts"));
        let entry = store.get("empty.ts").unwrap();
        assert!(entry.nodes.is_empty());
        assert!(store.is_valid("empty.ts", "h"));
    }

    #[test]
    fn test_labels_preserved_across_batches() {
        let mut store = FileAnalysisStore::new();
        let mut first = AnalysisResult {
            nodes: vec![node("a.ts::f", "a.ts"), node("a.ts::g", "a.ts")],
            ..Default::default()
        };
        first.workflow_hints.insert("a.ts::f".to_string(), "Ingest".to_string());
        first.workflow_hints.insert("a.ts::g".to_string(), "Ingest".to_string());
        store.store(&first, &hashes(&[("a.ts", "h1")]));

        let mut second = first.clone();
        second.workflow_hints.clear();
        second.workflow_hints.insert("a.ts::g".to_string(), "Report".to_string());
        store.store(&second, &hashes(&[("a.ts", "h2")]));

        let labels = store.get("a.ts").unwrap().workflow_labels.clone().unwrap();
        assert_eq!(labels["a.ts::f"], "Ingest");
        assert_eq!(labels["a.ts::g"], "Report");
    }

    #[test]
    fn test_symbolic_nodes_and_edges() {
        let mut store = FileAnalysisStore::new();
        let result = AnalysisResult {
            nodes: vec![
                node("a.ts::send", "a.ts"),
                Node::new("OpenAI", "OpenAI", NodeKind::llm()),
            ],
            edges: vec![
                Edge::new("a.ts::send", "OpenAI"),
                Edge::new("OpenAI", "Anthropic"),
            ],
            workflow_hints: BTreeMap::new(),
        };
        let batch = store.store(&result, &hashes(&[("a.ts", "h")]));
        assert_eq!(batch.symbolic_nodes, 1);
        assert_eq!(batch.cross_file_edges.len(), 2);
        assert_eq!(batch.cross_file_edges[0].source_file, "a.ts");
        assert_eq!(batch.cross_file_edges[0].target_file, "");

        // symbol to symbol: kept, with no file on either side
        let between = &batch.cross_file_edges[1];
        assert_eq!((between.source_node_id.as_str(), between.target_node_id.as_str()), ("OpenAI", "Anthropic"));
        assert!(between.source_file.is_empty() && between.target_file.is_empty());

        let entry = store.get("a.ts").unwrap();
        assert_eq!(entry.symbols.len(), 1);
        assert!(entry.symbols[0].is_marker());
        assert!(!entry.has_node("OpenAI"));
        assert_eq!(store.symbol_ids().into_iter().collect::<Vec<_>>(), vec!["OpenAI"]);
    }

    #[test]
    fn test_symbols_kept_on_referencing_files() {
        let mut store = FileAnalysisStore::new();
        let result = AnalysisResult {
            nodes: vec![
                node("a.ts::send", "a.ts"),
                node("b.ts::route", "b.ts"),
                Node::new("OpenAI", "OpenAI Chat", NodeKind::llm()),
                Node::new("Queue", "Job Queue", NodeKind::Step),
                Node::new("Webhook", "Webhook", NodeKind::Step),
                Node::new("Unused", "Unused", NodeKind::Step),
            ],
            edges: vec![
                Edge::new("a.ts::send", "OpenAI"),
                Edge::new("Queue", "Webhook"),
            ],
            workflow_hints: BTreeMap::new(),
        };
        let batch = store.store(&result, &hashes(&[("a.ts", "h1"), ("b.ts", "h2")]));
        assert_eq!(batch.symbolic_nodes, 4);

        let ids = |file: &str| -> Vec<String> {
            store.get(file).unwrap().symbols.iter().map(|n| n.id.clone()).collect()
        };
        assert_eq!(ids("a.ts"), vec!["OpenAI", "Queue", "Webhook"]);
        assert_eq!(ids("b.ts"), vec!["Queue", "Webhook"]);
    }

    #[test]
    fn test_invalidate_and_prune() {
        let mut store = FileAnalysisStore::new();
        store.store(
            &AnalysisResult::default(),
            &hashes(&[("a.ts", "h"), ("b.ts", "h")]),
        );
        assert!(store.invalidate("./a.ts"));
        assert!(!store.is_valid("a.ts", "h"));

        let existing: BTreeSet<String> = BTreeSet::new();
        let stale = store.prune_stale(&existing);
        assert!(stale.contains("b.ts"));
        assert!(store.is_empty());
    }
}
