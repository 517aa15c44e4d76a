//! Applies a call graph diff directly to one cached file entry
//!
//! Used when a file changes and the external analyzer is not involved.
//! New nodes are provisional: they are labeled from the function name and
//! queued for a best-effort description pass.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::callgraph::{structural_fingerprint, CallGraphDiff, FileCallGraph, FunctionDef};
use crate::error::{CodagError, Result};
use crate::node_id::{humanize, NodeId, ID_SEPARATOR};
use crate::paths::normalize_path;
use crate::schema::{now_millis, CrossFileEdge, Edge, FileCacheEntry, Node, NodeKind};
use crate::store::{CrossFileEdgeRegistry, FileAnalysisStore};

/// What a local update changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUpdateOutcome {
    pub path: String,
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub updated_nodes: Vec<String>,
    pub added_edges: usize,
    pub removed_edges: usize,
}

impl LocalUpdateOutcome {
    pub fn is_noop(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.updated_nodes.is_empty()
            && self.added_edges == 0
            && self.removed_edges == 0
    }
}

/// Function name a node stands for
pub fn node_function(node: &Node) -> Option<String> {
    if let Some(function) = node.source.as_ref().and_then(|s| s.function.as_ref()) {
        return Some(function.clone());
    }
    NodeId::parse(&node.id).ok().map(|id| id.function().to_string())
}

pub struct LocalUpdateApplier<'a> {
    store: &'a mut FileAnalysisStore,
    registry: &'a mut CrossFileEdgeRegistry,
}

impl<'a> LocalUpdateApplier<'a> {
    pub fn new(store: &'a mut FileAnalysisStore, registry: &'a mut CrossFileEdgeRegistry) -> Self {
        Self { store, registry }
    }

    /// Patch the entry for `path` with `diff`
    ///
    /// `graph` is the extraction the diff was computed against (the new
    /// side); `content_hash` becomes the entry's hash.
    pub fn apply(
        &mut self,
        path: &str,
        diff: &CallGraphDiff,
        graph: &FileCallGraph,
        content_hash: &str,
    ) -> Result<LocalUpdateOutcome> {
        let path = normalize_path(path);
        let others = self.index_other_files(&path);
        let timestamp = now_millis();

        let entry = self
            .store
            .get_mut(&path)
            .ok_or_else(|| CodagError::FileNotFound { path: path.clone() })?;

        let mut outcome = LocalUpdateOutcome {
            path: path.clone(),
            ..Default::default()
        };
        let mut new_cross_edges: Vec<CrossFileEdge> = Vec::new();

        // Removed functions
        let removed: BTreeSet<&str> = diff.removed_functions.iter().map(String::as_str).collect();
        let removed_ids: BTreeSet<String> = entry
            .nodes
            .iter()
            .filter(|n| node_function(n).is_some_and(|f| removed.contains(f.as_str())))
            .map(|n| n.id.clone())
            .collect();
        if !removed_ids.is_empty() {
            entry.nodes.retain(|n| !removed_ids.contains(&n.id));
            let before = entry.internal_edges.len();
            entry
                .internal_edges
                .retain(|e| !removed_ids.contains(&e.source) && !removed_ids.contains(&e.target));
            outcome.removed_edges += before - entry.internal_edges.len();
            if let Some(labels) = entry.workflow_labels.as_mut() {
                labels.retain(|id, _| !removed_ids.contains(id));
            }
            entry.pending_enrichment.retain(|id| !removed_ids.contains(id));
            outcome.removed_edges += self.registry.remove_node_edges(&removed_ids);
        }
        outcome.removed_nodes = removed_ids.into_iter().collect();

        // Modified functions: refresh the source line only
        for name in &diff.modified_functions {
            let Some(def) = graph.function(name) else { continue };
            for node in entry.nodes.iter_mut() {
                if node_function(node).as_deref() != Some(name.as_str()) {
                    continue;
                }
                if let Some(source) = node.source.as_mut() {
                    if source.line != def.start_line {
                        source.line = def.start_line;
                        outcome.updated_nodes.push(node.id.clone());
                    }
                }
            }
        }

        // Added functions
        for name in &diff.added_functions {
            let Some(def) = graph.function(name) else { continue };
            let node = provisional_node(entry, &path, def);
            tracing::debug!("[LOCAL] Added provisional node {}", node.id);
            entry.pending_enrichment.insert(node.id.clone());
            outcome.added_nodes.push(node.id.clone());
            entry.nodes.push(node);
        }

        // Wire the added functions' calls, then the diff's edge changes
        let mut additions: Vec<(String, String)> = Vec::new();
        for id in &outcome.added_nodes {
            let Some(def) = entry.node(id).and_then(node_function).and_then(|f| graph.function(&f)) else {
                continue;
            };
            for callee in &def.calls {
                additions.push((id.clone(), callee.clone()));
            }
        }
        for edge in &diff.added_edges {
            for caller in ids_for_function(entry, &edge.caller) {
                additions.push((caller, edge.callee.clone()));
            }
        }

        for (caller, callee) in additions {
            for target in resolve_callee(entry, &others, &callee) {
                match target {
                    Target::Local(target) => {
                        if entry.add_edge(Edge::new(caller.clone(), target)) {
                            outcome.added_edges += 1;
                        }
                    }
                    Target::Remote { file, id } => new_cross_edges.push(CrossFileEdge {
                        source_file: path.clone(),
                        source_node_id: caller.clone(),
                        target_file: file,
                        target_node_id: id,
                        label: None,
                        timestamp,
                    }),
                }
            }
        }

        let mut remote_removals: Vec<(String, String)> = Vec::new();
        for edge in &diff.removed_edges {
            for caller in ids_for_function(entry, &edge.caller) {
                for target in resolve_callee(entry, &others, &edge.callee) {
                    match target {
                        Target::Local(target) => {
                            let before = entry.internal_edges.len();
                            entry
                                .internal_edges
                                .retain(|e| !(e.source == caller && e.target == target));
                            outcome.removed_edges += before - entry.internal_edges.len();
                        }
                        Target::Remote { id, .. } => remote_removals.push((caller.clone(), id)),
                    }
                }
            }
        }

        entry.content_hash = content_hash.to_string();
        entry.timestamp = timestamp;
        entry.functions = function_calls(graph);

        for (source, target) in remote_removals {
            if self.registry.remove_between(&source, &target) {
                outcome.removed_edges += 1;
            }
        }
        outcome.added_edges += self.registry.merge(new_cross_edges);

        tracing::info!(
            "[LOCAL] {}: +{} / -{} nodes, ~{} moved, +{} / -{} edges",
            path,
            outcome.added_nodes.len(),
            outcome.removed_nodes.len(),
            outcome.updated_nodes.len(),
            outcome.added_edges,
            outcome.removed_edges
        );

        Ok(outcome)
    }

    /// Function name to `(file, node id)` for every other cached file
    fn index_other_files(&self, path: &str) -> BTreeMap<String, Vec<(String, String)>> {
        let mut index: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (file, node) in self.store.nodes() {
            if file == path {
                continue;
            }
            if let Some(function) = node_function(node) {
                index
                    .entry(function)
                    .or_default()
                    .push((file.to_string(), node.id.clone()));
            }
        }
        index
    }
}

enum Target {
    Local(String),
    Remote { file: String, id: String },
}

/// Every node the callee name can refer to
///
/// A definition in the same file shadows the others. Otherwise each cached
/// file defining the name gets an edge, since the call graph carries no
/// import resolution to pick between them.
fn resolve_callee(
    entry: &FileCacheEntry,
    others: &BTreeMap<String, Vec<(String, String)>>,
    callee: &str,
) -> Vec<Target> {
    let local = ids_for_function(entry, callee);
    if !local.is_empty() {
        return local.into_iter().map(Target::Local).collect();
    }
    others
        .get(callee)
        .map(|candidates| {
            candidates
                .iter()
                .map(|(file, id)| Target::Remote {
                    file: file.clone(),
                    id: id.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn ids_for_function(entry: &FileCacheEntry, function: &str) -> Vec<String> {
    entry
        .nodes
        .iter()
        .filter(|n| node_function(n).as_deref() == Some(function))
        .map(|n| n.id.clone())
        .collect()
}

/// Node for a newly added function; the line disambiguates a colliding id
fn provisional_node(entry: &FileCacheEntry, path: &str, def: &FunctionDef) -> Node {
    let mut id = format!("{}{}{}", path, ID_SEPARATOR, def.name);
    if entry.has_node(&id) {
        id = format!("{}{}{}", id, ID_SEPARATOR, def.start_line);
    }

    let kind = if def.has_external_call {
        NodeKind::llm()
    } else {
        NodeKind::Step
    };

    Node::new(id, humanize(&def.name), kind).with_source(path, def.start_line, Some(&def.name))
}

/// Callee names per function, the form persisted on a cache entry
pub fn function_calls(graph: &FileCallGraph) -> BTreeMap<String, BTreeSet<String>> {
    graph
        .functions
        .iter()
        .map(|f| (f.name.clone(), f.calls.clone()))
        .collect()
}

/// Rebuild the last extraction of a file from its persisted callee map
///
/// Returns `None` when the entry carries no map (written before local
/// updates were possible, or for a language without a call grammar).
/// Lines come from the entry's nodes where one matches; the diff only
/// compares names and callees.
pub fn baseline_from_functions(entry: &FileCacheEntry) -> Option<FileCallGraph> {
    if entry.functions.is_empty() {
        return None;
    }

    let lines: BTreeMap<String, u32> = entry
        .nodes
        .iter()
        .filter_map(|n| {
            let line = n.source.as_ref().map(|s| s.line)?;
            node_function(n).map(|f| (f, line))
        })
        .collect();

    let mut functions: Vec<FunctionDef> = entry
        .functions
        .iter()
        .map(|(name, calls)| {
            let line = lines.get(name).copied().unwrap_or(0);
            FunctionDef {
                name: name.clone(),
                start_line: line,
                end_line: line,
                is_async: false,
                params: Vec::new(),
                calls: calls.clone(),
                has_external_call: false,
            }
        })
        .collect();
    functions.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.name.cmp(&b.name)));
    let fingerprint = structural_fingerprint(&functions);

    Some(FileCallGraph {
        language: String::new(),
        functions,
        imports: Vec::new(),
        calls: Vec::new(),
        tracked_vars: BTreeSet::new(),
        fingerprint,
    })
}

/// Rebuild an extraction baseline from a cached entry's nodes
///
/// Last resort when neither the extraction itself nor its persisted callee
/// map is available. Only functions the analyzer emitted a node for are
/// known. Callees come from the entry's internal edges and the registry's
/// outgoing edges.
pub fn baseline_from_entry(
    path: &str,
    entry: &FileCacheEntry,
    registry: &CrossFileEdgeRegistry,
) -> FileCallGraph {
    let function_of: BTreeMap<&str, String> = entry
        .nodes
        .iter()
        .filter_map(|n| node_function(n).map(|f| (n.id.as_str(), f)))
        .collect();

    let mut functions: BTreeMap<String, FunctionDef> = BTreeMap::new();
    for node in &entry.nodes {
        let Some(name) = function_of.get(node.id.as_str()) else { continue };
        let line = node.source.as_ref().map(|s| s.line).unwrap_or(0);
        functions.entry(name.clone()).or_insert_with(|| FunctionDef {
            name: name.clone(),
            start_line: line,
            end_line: line,
            is_async: false,
            params: Vec::new(),
            calls: BTreeSet::new(),
            has_external_call: node.is_marker(),
        });
    }

    for edge in &entry.internal_edges {
        if let (Some(caller), Some(callee)) =
            (function_of.get(edge.source.as_str()), function_of.get(edge.target.as_str()))
        {
            if let Some(def) = functions.get_mut(caller) {
                def.calls.insert(callee.clone());
            }
        }
    }

    let path = normalize_path(path);
    for edge in registry.iter().filter(|e| e.source_file == path) {
        let Some(caller) = function_of.get(edge.source_node_id.as_str()) else { continue };
        let Ok(target) = NodeId::parse(&edge.target_node_id) else { continue };
        if let Some(def) = functions.get_mut(caller) {
            def.calls.insert(target.function().to_string());
        }
    }

    let mut functions: Vec<FunctionDef> = functions.into_values().collect();
    functions.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.name.cmp(&b.name)));
    let fingerprint = structural_fingerprint(&functions);

    FileCallGraph {
        language: String::new(),
        functions,
        imports: Vec::new(),
        calls: Vec::new(),
        tracked_vars: BTreeSet::new(),
        fingerprint,
    }
}
