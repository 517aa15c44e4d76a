//! Reconciles imprecise edge endpoints against the live node set
//!
//! Analyzer batches and the cross-file registry refer to nodes by ids that
//! may use a shortened or un-normalized path, a different case, or a stale
//! line number. Resolution tries exact, case-insensitive, then
//! suffix matching. Anything still unresolved becomes a stub node so the
//! edge survives; a bare symbol the analyzer defined keeps its definition.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::node_id::{clean_symbol, humanize, NodeId};
use crate::paths::paths_match;
use crate::schema::{Edge, Node, NodeKind, SourceLocation};

/// Resolver over one merge's live node set
///
/// Stubs are memoized for the lifetime of the resolver, so each distinct
/// unresolved id yields at most one stub.
pub struct NodeIdResolver<'a> {
    live: AHashMap<&'a str, &'a Node>,
    lowercase: AHashMap<String, &'a str>,
    /// Parsed live ids in id order
    parsed: Vec<(NodeId, &'a str)>,
    /// Bare-symbol definitions by id
    symbols: AHashMap<&'a str, &'a Node>,
    /// Stub id to stub
    stubs: BTreeMap<String, Node>,
    /// Raw unresolved id to stub id
    memo: AHashMap<String, String>,
}

impl<'a> NodeIdResolver<'a> {
    pub fn new<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a Node>,
    {
        let mut live: AHashMap<&'a str, &'a Node> = AHashMap::new();
        for node in nodes {
            live.entry(node.id.as_str()).or_insert(node);
        }

        let mut ids: Vec<&'a str> = live.keys().copied().collect();
        ids.sort_unstable();

        let mut lowercase: AHashMap<String, &'a str> = AHashMap::new();
        let mut parsed = Vec::new();
        for id in &ids {
            lowercase.entry(id.to_lowercase()).or_insert(*id);
            if let Ok(node_id) = NodeId::parse(id) {
                parsed.push((node_id.normalized(), *id));
            }
        }

        Self {
            live,
            lowercase,
            parsed,
            symbols: AHashMap::new(),
            stubs: BTreeMap::new(),
            memo: AHashMap::new(),
        }
    }

    /// Definitions for bare-symbol ids; the first definition of an id wins
    pub fn with_symbols<I>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = &'a Node>,
    {
        for node in symbols {
            self.symbols.entry(node.id.trim()).or_insert(node);
        }
        self
    }

    /// Resolve an id to a live node id, without creating stubs
    pub fn resolve(&self, raw: &str) -> Option<&'a str> {
        let id = raw.trim();
        if let Some((key, _)) = self.live.get_key_value(id) {
            return Some(*key);
        }
        if let Some(found) = self.lowercase.get(&id.to_lowercase()) {
            return Some(*found);
        }

        let wanted = NodeId::parse(id).ok()?.normalized();
        self.suffix_match(&wanted)
    }

    /// Match by function name and path suffix
    ///
    /// Prefers an equal line, then a candidate where either side has no
    /// line, then any candidate (the line went stale). Ties go to the
    /// smallest id.
    fn suffix_match(&self, wanted: &NodeId) -> Option<&'a str> {
        let candidates: Vec<&(NodeId, &'a str)> = self
            .parsed
            .iter()
            .filter(|(id, _)| {
                id.function() == wanted.function() && paths_match(id.file(), wanted.file())
            })
            .collect();

        let same_line = candidates
            .iter()
            .find(|(id, _)| wanted.line().is_some() && id.line() == wanted.line());
        let lineless = candidates
            .iter()
            .find(|(id, _)| id.line().is_none() || wanted.line().is_none());

        same_line
            .or(lineless)
            .or_else(|| candidates.first())
            .map(|(_, raw)| *raw)
    }

    /// Resolve both endpoints of an edge, synthesizing stubs as needed
    ///
    /// Returns `None` when the resolved edge is a self-loop.
    pub fn resolve_edge(&mut self, edge: &Edge) -> Option<Edge> {
        let source = self.resolve(&edge.source).map(str::to_string);
        let target = self.resolve(&edge.target).map(str::to_string);

        let (source, target) = match (source, target) {
            (Some(source), Some(target)) => (source, target),
            (Some(source), None) => {
                let target = self.stub_for(&edge.target, Some(&source));
                (source, target)
            }
            (None, Some(target)) => {
                let source = self.stub_for(&edge.source, Some(&target));
                (source, target)
            }
            // File-reference stubs first, so a symbolic stub on the other
            // end can borrow their location
            (None, None) if !is_file_reference(&edge.source) && is_file_reference(&edge.target) => {
                let target = self.stub_for(&edge.target, None);
                let source = self.stub_for(&edge.source, Some(&target));
                (source, target)
            }
            (None, None) => {
                let source = self.stub_for(&edge.source, None);
                let target = self.stub_for(&edge.target, Some(&source));
                (source, target)
            }
        };

        if source == target {
            return None;
        }

        Some(Edge {
            source,
            target,
            label: edge.label.clone(),
        })
    }

    /// Find or create the stub for an unresolved id
    ///
    /// `anchor` is the id at the other end of the edge; a symbolic stub
    /// takes its source location from it.
    fn stub_for(&mut self, raw: &str, anchor: Option<&str>) -> String {
        let raw = raw.trim();
        if let Some(id) = self.memo.get(raw) {
            return id.clone();
        }

        let stub = match NodeId::parse(raw) {
            Ok(parsed) if parsed.has_file_extension() => {
                let parsed = parsed.normalized();
                Node::new(parsed.to_string(), humanize(parsed.function()), NodeKind::Step).with_source(
                    parsed.file(),
                    parsed.line().unwrap_or(0),
                    Some(parsed.function()),
                )
            }
            _ => {
                let mut node = match self.symbols.get(raw) {
                    Some(defined) => Node {
                        id: raw.to_string(),
                        ..(*defined).clone()
                    },
                    None => Node::new(raw, clean_symbol(raw), NodeKind::Step),
                };
                if node.source.is_none() {
                    node.source = anchor.and_then(|a| self.location_of(a));
                }
                node
            }
        };

        let id = stub.id.clone();
        if !self.stubs.contains_key(&id) {
            tracing::debug!("[MERGE] Synthesized stub {} for unresolved {}", id, raw);
            self.stubs.insert(id.clone(), stub);
        }
        self.memo.insert(raw.to_string(), id.clone());
        id
    }

    fn location_of(&self, id: &str) -> Option<SourceLocation> {
        self.live
            .get(id)
            .and_then(|n| n.source.clone())
            .or_else(|| self.stubs.get(id).and_then(|n| n.source.clone()))
    }

    pub fn stub_count(&self) -> usize {
        self.stubs.len()
    }

    /// The synthesized stubs, in id order
    pub fn into_stubs(self) -> Vec<Node> {
        self.stubs.into_values().collect()
    }
}

fn is_file_reference(raw: &str) -> bool {
    NodeId::parse(raw)
        .map(|id| id.has_file_extension())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> Vec<Node> {
        vec![
            Node::new("backend/client.py::call_llm::12", "Call", NodeKind::llm())
                .with_source("backend/client.py", 12, Some("call_llm")),
            Node::new("backend/main.py::handler", "Handler", NodeKind::Step)
                .with_source("backend/main.py", 3, Some("handler")),
            Node::new("src/App.ts::render", "Render", NodeKind::Step),
        ]
    }

    #[test]
    fn test_exact_and_case_insensitive() {
        let nodes = live();
        let resolver = NodeIdResolver::new(&nodes);
        assert_eq!(
            resolver.resolve("backend/main.py::handler"),
            Some("backend/main.py::handler")
        );
        assert_eq!(resolver.resolve("src/app.ts::RENDER"), Some("src/App.ts::render"));
    }

    #[test]
    fn test_suffix_match_with_stale_line() {
        let nodes = live();
        let resolver = NodeIdResolver::new(&nodes);
        assert_eq!(
            resolver.resolve("client.py::call_llm"),
            Some("backend/client.py::call_llm::12")
        );
        assert_eq!(
            resolver.resolve("./backend\\client.py::call_llm::40"),
            Some("backend/client.py::call_llm::12")
        );
        assert_eq!(resolver.resolve("myclient.py::call_llm"), None);
    }

    #[test]
    fn test_file_reference_stub() {
        let nodes = live();
        let mut resolver = NodeIdResolver::new(&nodes);
        let edge = resolver
            .resolve_edge(&Edge::new("backend/main.py::handler", "backend/db.py::save::7"))
            .unwrap();
        assert_eq!(edge.target, "backend/db.py::save::7");

        let stubs = resolver.into_stubs();
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].label, "Save");
        let source = stubs[0].source.as_ref().unwrap();
        assert_eq!(source.file, "backend/db.py");
        assert_eq!(source.line, 7);
    }

    #[test]
    fn test_symbolic_stub_borrows_anchor_location() {
        let nodes = live();
        let mut resolver = NodeIdResolver::new(&nodes);
        resolver
            .resolve_edge(&Edge::new("backend/main.py::handler", "stripe_webhook"))
            .unwrap();
        resolver
            .resolve_edge(&Edge::new("external_queue", "backend/client.py::call_llm::12"))
            .unwrap();

        let stubs = resolver.into_stubs();
        let webhook = stubs.iter().find(|n| n.id == "stripe_webhook").unwrap();
        assert_eq!(webhook.label, "Stripe Webhook");
        assert_eq!(webhook.source.as_ref().unwrap().file, "backend/main.py");

        let queue = stubs.iter().find(|n| n.id == "external_queue").unwrap();
        assert_eq!(queue.source.as_ref().unwrap().line, 12);
    }

    #[test]
    fn test_defined_symbol_keeps_kind_and_label() {
        let nodes = live();
        let symbols = vec![Node::new(
            "OpenAI",
            "OpenAI Chat",
            NodeKind::Llm {
                model: Some("gpt-4o".to_string()),
                temperature: None,
            },
        )];
        let mut resolver = NodeIdResolver::new(&nodes).with_symbols(&symbols);
        resolver
            .resolve_edge(&Edge::new("backend/main.py::handler", " OpenAI"))
            .unwrap();
        resolver.resolve_edge(&Edge::new("OpenAI", "Anthropic")).unwrap();

        let stubs = resolver.into_stubs();
        let openai = stubs.iter().find(|n| n.id == "OpenAI").unwrap();
        assert!(openai.is_marker());
        assert_eq!(openai.label, "OpenAI Chat");
        assert_eq!(openai.model(), Some("gpt-4o"));
        assert_eq!(openai.source.as_ref().unwrap().file, "backend/main.py");

        // undefined symbol on the far side still becomes a plain stub
        let anthropic = stubs.iter().find(|n| n.id == "Anthropic").unwrap();
        assert_eq!(anthropic.kind, NodeKind::Step);
        assert_eq!(anthropic.source.as_ref().unwrap().file, "backend/main.py");
    }

    #[test]
    fn test_one_stub_per_unresolved_id() {
        let nodes = live();
        let mut resolver = NodeIdResolver::new(&nodes);
        for _ in 0..3 {
            resolver.resolve_edge(&Edge::new("backend/main.py::handler", "OpenAI"));
            resolver.resolve_edge(&Edge::new("src/App.ts::render", "OpenAI"));
        }
        assert_eq!(resolver.stub_count(), 1);
    }

    #[test]
    fn test_resolved_self_loop_dropped() {
        let nodes = live();
        let mut resolver = NodeIdResolver::new(&nodes);
        let edge = Edge::new("main.py::handler", "backend/main.py::handler");
        assert!(resolver.resolve_edge(&edge).is_none());
    }
}
