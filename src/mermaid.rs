//! Analyzer response parser
//!
//! The external analyzer answers with one or more Mermaid `flowchart TD`
//! blocks followed by a metadata section:
//!
//! ```text
//! flowchart TD
//!     %% Workflow: Code Analysis Pipeline
//!     main.py::analyze[Receive Request] --> client.py::call_llm([Gemini])
//!     client.py::call_llm --> main.py::parse::85{Valid?}
//!     main.py::parse::85 -->|yes| main.py::respond[Return Result]
//!
//! ---
//! metadata:
//! main.py::analyze: {file: "main.py", line: 55, function: "analyze", type: "step"}
//! client.py::call_llm: {file: "client.py", line: 42, type: "llm", model: "gemini-2.5-flash"}
//! ```
//!
//! Shapes pick the node type (`([..])` llm, `{..}` decision, anything else
//! step); metadata overrides it. Each `%% Workflow:` block becomes a
//! workflow hint for the nodes it defines.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{CodagError, Result};
use crate::node_id::NodeId;
use crate::schema::{AnalysisResult, Edge, Node, NodeKind, SourceLocation};

const DEFAULT_WORKFLOW: &str = "Main Workflow";

/// Node id: anything but whitespace and shape delimiters
const ID: &str = r"([^\s\[\](){}]+)";

/// Shape patterns, most specific first
static SHAPES: Lazy<Vec<(Regex, ShapeKind)>> = Lazy::new(|| {
    [
        (r"\[\[([^\]]+)\]\]", ShapeKind::Step),
        (r"\(\[([^\]]+)\]\)", ShapeKind::Llm),
        (r"\{([^}]+)\}", ShapeKind::Decision),
        (r"\[([^\]]+)\]", ShapeKind::Step),
        (r"\(([^)]+)\)", ShapeKind::Step),
    ]
    .into_iter()
    .filter_map(|(shape, kind)| match Regex::new(&format!("{}{}", ID, shape)) {
        Ok(re) => Some((re, kind)),
        Err(e) => {
            tracing::warn!("Skipping invalid shape pattern {:?}: {}", shape, e);
            None
        }
    })
    .collect()
});

/// `A --> B`, `A -->|label| B`, with an optional shape on the source
static EDGE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"([^\s\[\](){}|>]+)(?:\[\[[^\]]*\]\]|\(\[[^\]]*\]\)|\[[^\]]*\]|\{[^}]*\}|\([^)]*\))?\s*-->\s*(?:\|([^|]*)\|)?\s*([^\s\[\](){}|>]+)",
    )
    .ok()
});

static METADATA_SEPARATOR: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\n---\s*\n\s*metadata:").ok());

/// `key: {` at the start of a metadata entry; keys may contain `::`
static METADATA_ENTRY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"^\s*["']?(.+?)["']?\s*:\s*(\{.*)$"#).ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Step,
    Llm,
    Decision,
}

impl ShapeKind {
    fn node_kind(self) -> NodeKind {
        match self {
            Self::Step => NodeKind::Step,
            Self::Llm => NodeKind::llm(),
            Self::Decision => NodeKind::Decision,
        }
    }
}

/// One metadata entry
#[derive(Debug, Default, Deserialize)]
struct NodeMeta {
    file: Option<String>,
    line: Option<u32>,
    function: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    description: Option<String>,
}

/// Parse an analyzer response into a batch result
pub fn parse_response(response: &str) -> Result<AnalysisResult> {
    let response = strip_markdown(response);

    let upper = response.trim_start().to_uppercase();
    if upper.starts_with("NO_LLM") || upper.starts_with("NO LLM") {
        return Ok(AnalysisResult::default());
    }

    let (diagram, metadata) = split_sections(&response)?;
    let metadata = parse_metadata(&metadata)?;

    let mut nodes: Vec<Node> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    let mut raw_edges: Vec<(String, String, Option<String>)> = Vec::new();
    let mut workflow_hints: BTreeMap<String, String> = BTreeMap::new();

    for (workflow, lines) in workflow_blocks(&diagram) {
        for line in lines {
            for (id, label, shape) in shapes_in(line) {
                if index.contains_key(&id) {
                    continue;
                }
                workflow_hints.entry(id.clone()).or_insert_with(|| workflow.clone());
                index.insert(id.clone(), nodes.len());
                nodes.push(Node::new(id, label, shape.node_kind()));
            }
            raw_edges.extend(edges_in(line));
        }
    }

    for node in nodes.iter_mut() {
        enrich(node, metadata.get(&node.id));
    }

    let mut edges = Vec::new();
    for (source, target, label) in raw_edges {
        if !index.contains_key(&source) {
            tracing::debug!("Skipping edge {} -> {}: source not defined", source, target);
            continue;
        }
        if !index.contains_key(&target) {
            tracing::debug!("Cross-batch edge target {} left for later resolution", target);
        }
        edges.push(Edge { source, target, label });
    }

    Ok(AnalysisResult {
        nodes,
        edges,
        workflow_hints,
    })
}

/// Remove Markdown code fences around and inside the response
pub fn strip_markdown(text: &str) -> String {
    let mut lines: Vec<&str> = text.trim().lines().collect();
    lines.retain(|line| !line.trim_start().starts_with("```"));
    lines.join("\n").trim().to_string()
}

/// Split into the diagram and the metadata body (without `metadata:`)
fn split_sections(response: &str) -> Result<(String, String)> {
    if let Some(found) = METADATA_SEPARATOR.as_ref().and_then(|re| re.find(response)) {
        return Ok((
            response[..found.start()].to_string(),
            response[found.end()..].to_string(),
        ));
    }

    if let Some(marker) = response.find("metadata:") {
        return match response[..marker].rfind("---") {
            Some(separator) => Ok((
                response[..separator].to_string(),
                response[marker + "metadata:".len()..].to_string(),
            )),
            None => Err(malformed("no `---` separator before `metadata:`", response)),
        };
    }

    match response.rfind("---") {
        Some(separator) => Ok((
            response[..separator].to_string(),
            response[separator + 3..].to_string(),
        )),
        None => Err(malformed("missing `---` metadata separator", response)),
    }
}

fn malformed(reason: &str, response: &str) -> CodagError {
    let preview: String = response.chars().take(200).collect();
    CodagError::MalformedResponse {
        message: format!("{}; response starts with: {}", reason, preview),
    }
}

/// Metadata entries by node id
///
/// Entries are `<id>: {flow mapping}`; a mapping may span lines. Stray
/// `NO_LLM` lines and anything after a further `---` are ignored.
fn parse_metadata(section: &str) -> Result<BTreeMap<String, NodeMeta>> {
    let section = strip_markdown(section);
    let section = section.trim_start();
    let section = section.strip_prefix("metadata:").unwrap_or(section);

    let mut entries = BTreeMap::new();
    let mut pending: Option<(String, String)> = None;

    for line in section.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("---") {
            break;
        }
        if pending.is_none() && (trimmed.is_empty() || trimmed.to_uppercase().starts_with("NO_LLM")) {
            continue;
        }

        let (key, mut value) = match pending.take() {
            Some((key, value)) => (key, value + " " + trimmed),
            None => {
                let captures = METADATA_ENTRY
                    .as_ref()
                    .and_then(|re| re.captures(line))
                    .ok_or_else(|| malformed("unparseable metadata line", line))?;
                (captures[1].trim().to_string(), captures[2].to_string())
            }
        };

        if brace_depth(&value) > 0 {
            pending = Some((key, value));
            continue;
        }

        value = value.trim().to_string();
        let meta: NodeMeta = json5::from_str(&value).map_err(|e| CodagError::MalformedResponse {
            message: format!("invalid metadata for {}: {}", key, e),
        })?;
        entries.insert(key, meta);
    }

    if let Some((key, _)) = pending {
        return Err(CodagError::MalformedResponse {
            message: format!("unterminated metadata for {}", key),
        });
    }

    Ok(entries)
}

/// Unclosed `{` count, ignoring braces inside quotes
fn brace_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Split the diagram into `(workflow name, lines)` blocks
fn workflow_blocks(diagram: &str) -> Vec<(String, Vec<&str>)> {
    let mut blocks = Vec::new();
    let mut name = DEFAULT_WORKFLOW.to_string();
    let mut lines: Vec<&str> = Vec::new();

    for line in diagram.lines().map(str::trim) {
        if line.starts_with("flowchart") || line.starts_with("graph ") {
            if !lines.is_empty() {
                blocks.push((std::mem::take(&mut name), std::mem::take(&mut lines)));
            }
            name = DEFAULT_WORKFLOW.to_string();
            continue;
        }
        if let Some(workflow) = line.strip_prefix("%% Workflow:") {
            if !lines.is_empty() {
                blocks.push((name.clone(), std::mem::take(&mut lines)));
            }
            name = workflow.trim().to_string();
            continue;
        }
        if !line.is_empty() && !line.starts_with("%%") {
            lines.push(line);
        }
    }
    if !lines.is_empty() {
        blocks.push((name, lines));
    }
    blocks
}

/// Shaped node definitions on a line, first shape per id wins
fn shapes_in(line: &str) -> Vec<(String, String, ShapeKind)> {
    let mut found: Vec<(String, String, ShapeKind)> = Vec::new();
    for (re, kind) in SHAPES.iter() {
        for captures in re.captures_iter(line) {
            let id = captures[1].to_string();
            if found.iter().any(|(existing, _, _)| *existing == id) {
                continue;
            }
            let label = captures[2]
                .trim()
                .trim_matches(|c: char| matches!(c, '[' | ']' | '{' | '}'))
                .to_string();
            found.push((id, label, *kind));
        }
    }
    found
}

/// Edges on a line, including chains like `A --> B --> C`
fn edges_in(line: &str) -> Vec<(String, String, Option<String>)> {
    let Some(re) = EDGE.as_ref() else {
        return Vec::new();
    };

    let mut edges = Vec::new();
    let mut start = 0;
    while let Some(captures) = re.captures_at(line, start) {
        let (Some(source), Some(target)) = (captures.get(1), captures.get(3)) else {
            break;
        };
        let label = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|l| !l.is_empty());
        edges.push((source.as_str().to_string(), target.as_str().to_string(), label));
        start = target.start();
    }
    edges
}

/// Apply metadata, or infer the location from a file-reference id
fn enrich(node: &mut Node, meta: Option<&NodeMeta>) {
    if let Some(meta) = meta {
        if let Some(kind) = &meta.kind {
            node.kind = NodeKind::from_type_name(kind);
        }
        if let NodeKind::Llm { model, temperature } = &mut node.kind {
            if meta.model.is_some() {
                *model = meta.model.clone();
            }
            if meta.temperature.is_some() {
                *temperature = meta.temperature;
            }
        }
        if meta.description.is_some() {
            node.description = meta.description.clone();
        }
        if let (Some(file), Some(line)) = (&meta.file, meta.line) {
            node.source = Some(SourceLocation {
                file: file.clone(),
                line,
                function: meta.function.clone(),
            });
        }
    }

    if node.source.is_none() {
        if let Ok(id) = NodeId::parse(&node.id) {
            node.source = Some(SourceLocation {
                file: id.file().to_string(),
                line: id.line().unwrap_or(0),
                function: Some(id.function().to_string()),
            });
        }
    }
}
