//! Graph data model shared by the cache, the merge pipeline and the snapshot
//!
//! All types serialize with camelCase field names, matching the persisted
//! cache document and the companion graph snapshot.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Deserializer, Serialize};

// FNV-1a constants for 64-bit hash
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Compute a stable FNV-1a hash (deterministic across runs and platforms)
///
/// Used for content hashes and structural fingerprints.
pub fn fnv1a_hash(data: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a hash rendered as a fixed-width hex string
pub fn fnv1a_hex(data: &str) -> String {
    format!("{:016x}", fnv1a_hash(data))
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// ============================================================================
// Nodes and edges
// ============================================================================

/// Where a node lives in the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Workspace-relative path
    pub file: String,

    /// 1-based line, 0 when unknown
    #[serde(default)]
    pub line: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// Node variant, serialized under the `type` key
///
/// Deserialization is lenient: type names match case-insensitively, and a
/// node with an invented type name or no `type` key at all is a `Step`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Externally meaningful call (the marker type)
    Llm {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
    },
    /// Branch point
    Decision,
    /// Ordinary processing step
    Step,
}

/// Wire shape of the fields [`NodeKind`] is read from
#[derive(Deserialize)]
struct RawNodeKind {
    #[serde(rename = "type", default)]
    type_name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawNodeKind::deserialize(deserializer)?;
        let kind = match raw.type_name.as_deref() {
            Some(name) => Self::from_type_name(name),
            None => Self::Step,
        };
        Ok(match kind {
            Self::Llm { .. } => Self::Llm {
                model: raw.model,
                temperature: raw.temperature,
            },
            other => other,
        })
    }
}

impl NodeKind {
    /// Marker kind without provider metadata
    pub fn llm() -> Self {
        Self::Llm {
            model: None,
            temperature: None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Llm { .. } => "llm",
            Self::Decision => "decision",
        }
    }

    /// Parse a loose type name; anything unrecognized is a step
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "llm" => Self::llm(),
            "decision" => Self::Decision,
            _ => Self::Step,
        }
    }
}

/// A graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// `<relativeFilePath>::<functionName>[::<line>]`, or a bare symbol
    pub id: String,

    pub label: String,

    #[serde(flatten)]
    pub kind: NodeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLocation>,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            description: None,
            source: None,
        }
    }

    pub fn with_source(mut self, file: &str, line: u32, function: Option<&str>) -> Self {
        self.source = Some(SourceLocation {
            file: file.to_string(),
            line,
            function: function.map(str::to_string),
        });
        self
    }

    /// Whether this node is a marker (externally meaningful action)
    pub fn is_marker(&self) -> bool {
        matches!(self.kind, NodeKind::Llm { .. })
    }

    pub fn model(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Llm { model, .. } => model.as_deref(),
            _ => None,
        }
    }
}

/// A directed edge between two node ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }

    /// Identity used for deduplication (labels do not distinguish edges)
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.target)
    }
}

// ============================================================================
// Workflows and graphs
// ============================================================================

/// A named, connected group of nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub node_ids: Vec<String>,
}

/// The externally visible graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub llms_detected: Vec<String>,
    #[serde(default)]
    pub workflows: Vec<WorkflowGroup>,
}

impl Graph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.workflows.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn edge_keys(&self) -> BTreeSet<(&str, &str)> {
        self.edges.iter().map(Edge::key).collect()
    }

    /// The workflow containing a node, if any
    pub fn workflow_of(&self, node_id: &str) -> Option<&WorkflowGroup> {
        self.workflows
            .iter()
            .find(|w| w.node_ids.iter().any(|id| id == node_id))
    }
}

/// Sorted, deduplicated model names of marker nodes
pub fn detect_llms(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(Node::model)
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Union several graphs into one
///
/// Nodes are unioned by id and workflows by id (first occurrence wins for
/// conflicting fields), edges by `(source, target)` with self-loops
/// dropped. Membership of the result does not depend on input order.
pub fn merge_graphs(graphs: &[Graph]) -> Graph {
    let mut merged = Graph::default();
    let mut seen_nodes: HashSet<String> = HashSet::new();
    let mut seen_edges: HashSet<(String, String)> = HashSet::new();
    let mut seen_llms: HashSet<String> = HashSet::new();
    let mut workflow_index: BTreeMap<String, usize> = BTreeMap::new();

    for graph in graphs {
        for node in &graph.nodes {
            if seen_nodes.insert(node.id.clone()) {
                merged.nodes.push(node.clone());
            }
        }

        for edge in &graph.edges {
            if edge.is_self_loop() {
                continue;
            }
            if seen_edges.insert((edge.source.clone(), edge.target.clone())) {
                merged.edges.push(edge.clone());
            }
        }

        for llm in &graph.llms_detected {
            if seen_llms.insert(llm.clone()) {
                merged.llms_detected.push(llm.clone());
            }
        }

        for workflow in &graph.workflows {
            match workflow_index.get(&workflow.id) {
                Some(&idx) => {
                    let existing = &mut merged.workflows[idx];
                    for id in &workflow.node_ids {
                        if !existing.node_ids.contains(id) {
                            existing.node_ids.push(id.clone());
                        }
                    }
                }
                None => {
                    workflow_index.insert(workflow.id.clone(), merged.workflows.len());
                    merged.workflows.push(workflow.clone());
                }
            }
        }
    }

    merged
}

// ============================================================================
// Analyzer input
// ============================================================================

/// One batch of output from the external analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Analyzer-asserted workflow label per node id
    #[serde(default)]
    pub workflow_hints: BTreeMap<String, String>,
}

impl AnalysisResult {
    /// Convert a graph-shaped analyzer response; workflow groups become
    /// per-node hints (a node listed by two groups keeps the first)
    pub fn from_graph(graph: Graph) -> Self {
        let mut workflow_hints = BTreeMap::new();
        for workflow in &graph.workflows {
            for id in &workflow.node_ids {
                workflow_hints
                    .entry(id.clone())
                    .or_insert_with(|| workflow.name.clone());
            }
        }

        Self {
            nodes: graph.nodes,
            edges: graph.edges,
            workflow_hints,
        }
    }
}

// ============================================================================
// Cache records
// ============================================================================

/// Cached analysis of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCacheEntry {
    pub content_hash: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges whose endpoints both live in this file
    #[serde(default)]
    pub internal_edges: Vec<Edge>,
    pub timestamp: u64,
    /// Analyzer-asserted workflow membership, node id to label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_labels: Option<BTreeMap<String, String>>,
    /// Nodes created by local updates that still lack a description
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub pending_enrichment: BTreeSet<String>,
    /// Callee names per function from the last extraction of this file
    ///
    /// The diff baseline for the next local update.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, BTreeSet<String>>,
    /// Bare-symbol nodes (no file) the analyzer defined alongside this
    /// file's nodes and linked to them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<Node>,
}

impl FileCacheEntry {
    pub fn new(content_hash: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            nodes: Vec::new(),
            internal_edges: Vec::new(),
            timestamp: now_millis(),
            workflow_labels: None,
            pending_enrichment: BTreeSet::new(),
            functions: BTreeMap::new(),
            symbols: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Add an internal edge unless it is a self-loop or already present
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        if edge.is_self_loop() || self.internal_edges.iter().any(|e| e.key() == edge.key()) {
            return false;
        }
        self.internal_edges.push(edge);
        true
    }
}

/// An edge whose endpoints live in different files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossFileEdge {
    /// Empty when the source is a bare symbol
    pub source_file: String,
    pub source_node_id: String,
    /// Empty when the target is a bare symbol
    pub target_file: String,
    pub target_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub timestamp: u64,
}

impl CrossFileEdge {
    /// Both endpoints are bare symbols
    pub fn is_between_symbols(&self) -> bool {
        self.source_file.is_empty() && self.target_file.is_empty()
    }

    /// Conflict key: `sourceFile:sourceId->targetFile:targetId`
    pub fn key(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.source_file, self.source_node_id, self.target_file, self.target_node_id
        )
    }

    pub fn as_edge(&self) -> Edge {
        Edge {
            source: self.source_node_id.clone(),
            target: self.target_node_id.clone(),
            label: self.label.clone(),
        }
    }
}

/// Last computed workflow, persisted for external readers only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub node_count: usize,
}

impl From<&WorkflowGroup> for WorkflowSummary {
    fn from(group: &WorkflowGroup) -> Self {
        Self {
            name: group.name.clone(),
            description: group.description.clone(),
            node_count: group.node_ids.len(),
        }
    }
}
