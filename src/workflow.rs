//! Workflow grouping
//!
//! Partitions the reconciled node set into named, connected workflows.
//!
//! With analyzer labels present, grouping runs in phases:
//!
//! 1. Seed workflows from stored per-node labels
//! 2. Propagate labels to unlabeled neighbors until a fixpoint (capped)
//! 3. Move nodes isolated from their own workflow to their neighbors'
//! 4. Group leftover nodes into connected components, named by file
//! 5. Detect hub files entered by several distinct workflows
//! 6. Extend workflows forward into unclaimed hub-file nodes
//! 7. Keep only workflows that reach a marker node
//!
//! Without any labels, workflows are plain connected components.
//!
//! Every iteration order is explicit (node ids sorted, adjacency sorted,
//! ties to the lowest index), so the result depends only on the node and
//! edge sets.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ahash::AHashMap;

use crate::config::CacheConfig;
use crate::node_id::{humanize, NodeId};
use crate::paths::file_stem;
use crate::schema::{Edge, Node, WorkflowGroup};

/// Prefix of every workflow id
pub const WORKFLOW_ID_PREFIX: &str = "workflow_";

/// Lowercase, non-alphanumerics to `_`, trimmed of `_`
pub fn sanitize_id(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Options for one computation
#[derive(Debug, Clone, Copy)]
pub struct WorkflowOptions {
    /// Drop workflows that cannot reach a marker node
    pub filter_unreachable: bool,
    pub hub_threshold: usize,
    pub max_iterations: usize,
}

impl WorkflowOptions {
    pub fn from_config(config: &CacheConfig, filter_unreachable: bool) -> Self {
        Self {
            filter_unreachable,
            hub_threshold: config.hub_threshold.max(1),
            max_iterations: config.propagation_iterations,
        }
    }
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default(), true)
    }
}

/// A workflow under construction
#[derive(Debug, Clone)]
struct Draft {
    id: String,
    name: String,
    /// Originates from analyzer labels (phases 1-3)
    seeded: bool,
}

/// Indexed view of the graph
struct Indexed<'a> {
    ids: Vec<&'a str>,
    files: Vec<String>,
    markers: Vec<bool>,
    /// Directed edges, deduplicated, sorted
    edges: Vec<(usize, usize)>,
    /// Forward adjacency, sorted
    outgoing: Vec<Vec<usize>>,
    /// Undirected adjacency with edge multiplicity, sorted
    neighbors: Vec<Vec<usize>>,
}

impl<'a> Indexed<'a> {
    fn new(nodes: &'a [Node], edges: &[Edge]) -> Self {
        let mut by_id: BTreeMap<&'a str, &'a Node> = BTreeMap::new();
        for node in nodes {
            by_id.entry(node.id.as_str()).or_insert(node);
        }

        let ids: Vec<&'a str> = by_id.keys().copied().collect();
        let index: AHashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let files = by_id.values().map(|n| node_file(n)).collect();
        let markers = by_id.values().map(|n| n.is_marker()).collect();

        let mut pairs: Vec<(usize, usize)> = edges
            .iter()
            .filter_map(|e| {
                let s = *index.get(e.source.as_str())?;
                let t = *index.get(e.target.as_str())?;
                (s != t).then_some((s, t))
            })
            .collect();
        pairs.sort_unstable();
        pairs.dedup();

        let mut outgoing = vec![Vec::new(); ids.len()];
        let mut neighbors = vec![Vec::new(); ids.len()];
        for &(s, t) in &pairs {
            outgoing[s].push(t);
            neighbors[s].push(t);
            neighbors[t].push(s);
        }
        for list in neighbors.iter_mut() {
            list.sort_unstable();
        }

        Self {
            ids,
            files,
            markers,
            edges: pairs,
            outgoing,
            neighbors,
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// File a node belongs to, empty for symbolic nodes without a location
pub fn node_file(node: &Node) -> String {
    if let Some(source) = &node.source {
        if !source.file.is_empty() {
            return source.file.clone();
        }
    }
    NodeId::parse(&node.id)
        .ok()
        .filter(NodeId::has_file_extension)
        .map(|id| id.file().to_string())
        .unwrap_or_default()
}

pub struct WorkflowComputer {
    options: WorkflowOptions,
}

impl WorkflowComputer {
    pub fn new(options: WorkflowOptions) -> Self {
        Self { options }
    }

    /// Group nodes into workflows
    ///
    /// `labels` maps node ids to analyzer-asserted workflow names; labels
    /// for unknown ids are ignored. Every node ends up in at most one
    /// returned workflow, and no returned workflow is empty.
    pub fn compute(
        &self,
        nodes: &[Node],
        edges: &[Edge],
        labels: &BTreeMap<String, String>,
    ) -> Vec<WorkflowGroup> {
        let graph = Indexed::new(nodes, edges);
        if graph.len() == 0 {
            return Vec::new();
        }

        let has_labels = graph.ids.iter().any(|id| labels.contains_key(*id));
        let groups = if has_labels {
            self.compute_phased(&graph, labels)
        } else {
            self.compute_components(&graph)
        };

        tracing::debug!(
            "[WORKFLOW] {} workflows over {} nodes ({})",
            groups.len(),
            graph.len(),
            if has_labels { "labeled" } else { "structural" }
        );
        groups
    }

    /// Fallback: undirected connected components
    fn compute_components(&self, graph: &Indexed) -> Vec<WorkflowGroup> {
        let unassigned = vec![None; graph.len()];
        let mut names = UniqueIds::default();
        let mut groups = Vec::new();

        for component in components(graph, &unassigned) {
            if self.options.filter_unreachable && !component.iter().any(|&i| graph.markers[i]) {
                continue;
            }
            let name = component_name(graph, &component);
            groups.push(WorkflowGroup {
                id: names.claim(&name),
                name,
                description: None,
                node_ids: sorted_ids(graph, &component),
            });
        }
        groups
    }

    fn compute_phased(&self, graph: &Indexed, labels: &BTreeMap<String, String>) -> Vec<WorkflowGroup> {
        let mut names = UniqueIds::default();
        let mut drafts: Vec<Draft> = Vec::new();
        let mut assignment: Vec<Option<usize>> = vec![None; graph.len()];

        // Phase 1: seed from labels
        let distinct: BTreeSet<&str> = graph
            .ids
            .iter()
            .filter_map(|id| labels.get(*id).map(String::as_str))
            .collect();
        let mut by_label: BTreeMap<&str, usize> = BTreeMap::new();
        for label in distinct {
            by_label.insert(label, drafts.len());
            drafts.push(Draft {
                id: names.claim(label),
                name: label.to_string(),
                seeded: true,
            });
        }
        for (i, id) in graph.ids.iter().enumerate() {
            if let Some(label) = labels.get(*id) {
                assignment[i] = by_label.get(label.as_str()).copied();
            }
        }

        // Phase 2: propagate to unassigned neighbors
        let mut iterations = 0;
        while iterations < self.options.max_iterations {
            iterations += 1;
            let snapshot = assignment.clone();
            let mut changed = false;
            for i in 0..graph.len() {
                if snapshot[i].is_some() {
                    continue;
                }
                if let Some(w) = dominant_workflow(&graph.neighbors[i], &snapshot, None) {
                    assignment[i] = Some(w);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        tracing::trace!("[WORKFLOW] Propagation settled after {} iterations", iterations);

        // Phase 3: reassign nodes cut off from their own workflow
        let snapshot = assignment.clone();
        for i in 0..graph.len() {
            let Some(own) = snapshot[i] else { continue };
            let same = graph.neighbors[i]
                .iter()
                .filter(|&&n| snapshot[n] == Some(own))
                .count();
            if same > 0 {
                continue;
            }
            if let Some(w) = dominant_workflow(&graph.neighbors[i], &snapshot, Some(own)) {
                assignment[i] = Some(w);
            }
        }

        // Phase 4: orphan components
        for component in components(graph, &assignment) {
            let name = component_name(graph, &component);
            let w = drafts.len();
            drafts.push(Draft {
                id: names.claim(&name),
                name,
                seeded: false,
            });
            for i in component {
                assignment[i] = Some(w);
            }
        }

        // Phase 5: hub files
        let hubs = hub_files(graph, &assignment, self.options.hub_threshold);
        if !hubs.is_empty() {
            tracing::debug!("[WORKFLOW] Hub files: {:?}", hubs);
        }

        // Phase 6: extend workflows through hub files
        let mut claimed = vec![false; graph.len()];
        for w in 0..drafts.len() {
            let mut queue: VecDeque<usize> = (0..graph.len())
                .filter(|&i| assignment[i] == Some(w))
                .collect();
            while let Some(current) = queue.pop_front() {
                for &next in &graph.outgoing[current] {
                    if assignment[next] == Some(w) || claimed[next] {
                        continue;
                    }
                    if !hubs.contains(graph.files[next].as_str()) {
                        continue;
                    }
                    let claimable = match assignment[next] {
                        None => true,
                        Some(owner) => drafts[w].seeded && !drafts[owner].seeded,
                    };
                    if claimable {
                        assignment[next] = Some(w);
                        claimed[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }

        // Phase 7: marker reachability
        let surviving = if self.options.filter_unreachable {
            reachable_workflows(graph, &assignment, drafts.len())
        } else {
            vec![true; drafts.len()]
        };

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); drafts.len()];
        for (i, w) in assignment.iter().enumerate() {
            if let Some(w) = w {
                members[*w].push(i);
            }
        }

        drafts
            .into_iter()
            .zip(members)
            .zip(surviving)
            .filter(|((_, nodes), keep)| *keep && !nodes.is_empty())
            .map(|((draft, nodes), _)| WorkflowGroup {
                id: draft.id,
                name: draft.name,
                description: None,
                node_ids: sorted_ids(graph, &nodes),
            })
            .collect()
    }
}

/// Workflow with the most neighbor edges, ties to the lowest index
fn dominant_workflow(neighbors: &[usize], assignment: &[Option<usize>], exclude: Option<usize>) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &n in neighbors {
        if let Some(w) = assignment[n] {
            if Some(w) != exclude {
                *counts.entry(w).or_insert(0) += 1;
            }
        }
    }
    counts
        .into_iter()
        .max_by(|(wa, ca), (wb, cb)| ca.cmp(cb).then_with(|| wb.cmp(wa)))
        .map(|(w, _)| w)
}

/// Connected components of the unassigned nodes, in index order
fn components(graph: &Indexed, assignment: &[Option<usize>]) -> Vec<Vec<usize>> {
    let mut visited: Vec<bool> = assignment.iter().map(Option::is_some).collect();
    let mut result = Vec::new();

    for start in 0..graph.len() {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for &next in &graph.neighbors[current] {
                if !visited[next] {
                    visited[next] = true;
                    component.push(next);
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        result.push(component);
    }
    result
}

/// Name a component after its most common file (ties to the smallest path)
fn component_name(graph: &Indexed, component: &[usize]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &i in component {
        let file = graph.files[i].as_str();
        if !file.is_empty() {
            *counts.entry(file).or_insert(0) += 1;
        }
    }

    let primary = counts
        .into_iter()
        .max_by(|(fa, ca), (fb, cb)| ca.cmp(cb).then_with(|| fb.cmp(fa)))
        .map(|(f, _)| f);

    match primary {
        Some(file) => {
            let label = humanize(file_stem(file));
            if label.is_empty() {
                file.to_string()
            } else {
                label
            }
        }
        None => humanize(graph.ids[component[0]]),
    }
}

/// Files entered by cross-file edges from at least `threshold` distinct
/// workflows
fn hub_files<'g>(graph: &'g Indexed, assignment: &[Option<usize>], threshold: usize) -> BTreeSet<&'g str> {
    let mut entering: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
    for &(s, t) in &graph.edges {
        let (source_file, target_file) = (&graph.files[s], &graph.files[t]);
        if target_file.is_empty() || source_file == target_file {
            continue;
        }
        if let Some(w) = assignment[s] {
            entering.entry(target_file.as_str()).or_default().insert(w);
        }
    }

    entering
        .into_iter()
        .filter(|(_, workflows)| workflows.len() >= threshold)
        .map(|(file, _)| file)
        .collect()
}

/// Workflows holding a marker, plus those connected to one through
/// cross-workflow edges
fn reachable_workflows(graph: &Indexed, assignment: &[Option<usize>], count: usize) -> Vec<bool> {
    let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    for &(s, t) in &graph.edges {
        if let (Some(a), Some(b)) = (assignment[s], assignment[t]) {
            if a != b {
                adjacency[a].insert(b);
                adjacency[b].insert(a);
            }
        }
    }

    let mut reached = vec![false; count];
    let mut queue = VecDeque::new();
    for (i, w) in assignment.iter().enumerate() {
        if let Some(w) = *w {
            if graph.markers[i] && !reached[w] {
                reached[w] = true;
                queue.push_back(w);
            }
        }
    }
    while let Some(w) = queue.pop_front() {
        for &next in &adjacency[w] {
            if !reached[next] {
                reached[next] = true;
                queue.push_back(next);
            }
        }
    }
    reached
}

fn sorted_ids(graph: &Indexed, members: &[usize]) -> Vec<String> {
    let mut ids: Vec<String> = members.iter().map(|&i| graph.ids[i].to_string()).collect();
    ids.sort();
    ids
}

/// Hands out `workflow_<name>` ids, suffixing repeats
#[derive(Default)]
struct UniqueIds {
    taken: BTreeSet<String>,
}

impl UniqueIds {
    fn claim(&mut self, name: &str) -> String {
        let base = match sanitize_id(name) {
            s if s.is_empty() => format!("{}unnamed", WORKFLOW_ID_PREFIX),
            s => format!("{}{}", WORKFLOW_ID_PREFIX, s),
        };
        let mut id = base.clone();
        let mut n = 2;
        while self.taken.contains(&id) {
            id = format!("{}_{}", base, n);
            n += 1;
        }
        self.taken.insert(id.clone());
        id
    }
}
