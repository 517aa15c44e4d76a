//! Builds the externally visible graph from the cached state
//!
//! Unions every file entry, reconciles internal and registry edges against
//! the live node set, then derives workflows. Nothing here mutates the
//! cache; stubs exist only in the returned graph.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashSet;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::paths::{normalize_path, paths_match};
use crate::schema::{detect_llms, Edge, Graph, Node};
use crate::store::{CrossFileEdgeRegistry, FileAnalysisStore, NodeIdResolver};
use crate::workflow::{node_file, WorkflowComputer, WorkflowOptions};

/// Counters for one merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub files: usize,
    pub live_nodes: usize,
    pub stub_nodes: usize,
    pub edges: usize,
    /// Edges that resolved to a self-loop or duplicated another edge
    pub discarded_edges: usize,
    pub workflows: usize,
    /// Whether unreachable workflows were dropped
    pub filtered: bool,
}

#[derive(Debug, Clone)]
pub struct MergedGraph {
    pub graph: Graph,
    pub stats: MergeStats,
}

pub struct MergedGraphBuilder<'a> {
    store: &'a FileAnalysisStore,
    registry: &'a CrossFileEdgeRegistry,
    options: WorkflowOptions,
}

impl<'a> MergedGraphBuilder<'a> {
    pub fn new(store: &'a FileAnalysisStore, registry: &'a CrossFileEdgeRegistry, config: &CacheConfig) -> Self {
        Self {
            store,
            registry,
            options: WorkflowOptions::from_config(config, true),
        }
    }

    /// Skip marker-reachability filtering (batches still outstanding)
    pub fn unfiltered(mut self, unfiltered: bool) -> Self {
        self.options.filter_unreachable = !unfiltered;
        self
    }

    /// Merge everything
    pub fn build(&self) -> MergedGraph {
        // Live nodes in file-key order; the first file to claim an id keeps it
        let mut seen: AHashSet<&str> = AHashSet::new();
        let live: Vec<Node> = self
            .store
            .nodes()
            .filter(|(_, node)| seen.insert(node.id.as_str()))
            .map(|(_, node)| node.clone())
            .collect();

        let mut labels: BTreeMap<String, String> = BTreeMap::new();
        for entry in self.store.entries().values() {
            for (id, label) in entry.workflow_labels.iter().flatten() {
                labels.entry(id.clone()).or_insert_with(|| label.clone());
            }
        }

        let raw_edges = self
            .store
            .entries()
            .values()
            .flat_map(|e| e.internal_edges.iter().cloned())
            .chain(self.registry.iter().map(|e| e.as_edge()));

        let mut stats = MergeStats {
            files: self.store.len(),
            live_nodes: live.len(),
            filtered: self.options.filter_unreachable,
            ..Default::default()
        };

        let mut edges: Vec<Edge> = Vec::new();
        let stubs = {
            let mut resolver = NodeIdResolver::new(&live).with_symbols(self.store.symbols());
            let mut keys: AHashSet<(String, String)> = AHashSet::new();
            for edge in raw_edges {
                match resolver.resolve_edge(&edge) {
                    Some(resolved) if keys.insert((resolved.source.clone(), resolved.target.clone())) => {
                        edges.push(resolved)
                    }
                    _ => stats.discarded_edges += 1,
                }
            }
            resolver.into_stubs()
        };
        stats.stub_nodes = stubs.len();

        let mut nodes = live;
        nodes.extend(stubs);

        let workflows = WorkflowComputer::new(self.options).compute(&nodes, &edges, &labels);

        if self.options.filter_unreachable {
            let kept: AHashSet<&str> = workflows
                .iter()
                .flat_map(|w| w.node_ids.iter().map(String::as_str))
                .collect();
            nodes.retain(|n| kept.contains(n.id.as_str()));
            edges.retain(|e| kept.contains(e.source.as_str()) && kept.contains(e.target.as_str()));
        }

        stats.edges = edges.len();
        stats.workflows = workflows.len();

        tracing::info!(
            "[MERGE] {} nodes ({} stubs), {} edges, {} workflows from {} files{}",
            nodes.len(),
            stats.stub_nodes,
            stats.edges,
            stats.workflows,
            stats.files,
            if stats.filtered { "" } else { " (unfiltered)" }
        );

        MergedGraph {
            graph: Graph {
                llms_detected: detect_llms(&nodes),
                nodes,
                edges,
                workflows,
            },
            stats,
        }
    }

    /// Merge everything, then narrow to the given files
    pub fn build_for_paths(&self, paths: &[String]) -> MergedGraph {
        narrow_to_paths(&self.build(), paths)
    }
}

/// Narrow a full merge to the given files
///
/// Keeps the workflows that touch a requested file with all of their
/// nodes, plus every node of the requested files, and the edges among
/// those nodes. An empty path list keeps everything.
pub fn narrow_to_paths(full: &MergedGraph, paths: &[String]) -> MergedGraph {
    if paths.is_empty() {
        return full.clone();
    }

    let requested: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
    let in_request = |node: &Node| {
        let file = node_file(node);
        !file.is_empty() && requested.iter().any(|p| paths_match(&file, p))
    };

    let file_nodes: BTreeSet<&str> = full
        .graph
        .nodes
        .iter()
        .filter(|&n| in_request(n))
        .map(|n| n.id.as_str())
        .collect();

    let workflows: Vec<_> = full
        .graph
        .workflows
        .iter()
        .filter(|w| w.node_ids.iter().any(|id| file_nodes.contains(id.as_str())))
        .cloned()
        .collect();

    let mut kept: AHashSet<&str> = file_nodes.iter().copied().collect();
    for workflow in &workflows {
        kept.extend(workflow.node_ids.iter().map(String::as_str));
    }

    let nodes: Vec<Node> = full
        .graph
        .nodes
        .iter()
        .filter(|n| kept.contains(n.id.as_str()))
        .cloned()
        .collect();
    let edges: Vec<Edge> = full
        .graph
        .edges
        .iter()
        .filter(|e| kept.contains(e.source.as_str()) && kept.contains(e.target.as_str()))
        .cloned()
        .collect();

    let stats = MergeStats {
        edges: edges.len(),
        workflows: workflows.len(),
        ..full.stats.clone()
    };

    MergedGraph {
        graph: Graph {
            llms_detected: detect_llms(&nodes),
            nodes,
            edges,
            workflows,
        },
        stats,
    }
}
