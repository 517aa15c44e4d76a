//! Structural diff between two extractions of the same file

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::extract::FileCallGraph;

/// A caller/callee pair by simple function name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
}

impl CallEdge {
    pub fn new(caller: impl Into<String>, callee: impl Into<String>) -> Self {
        Self {
            caller: caller.into(),
            callee: callee.into(),
        }
    }
}

/// What changed between two extractions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallGraphDiff {
    pub added_functions: Vec<String>,
    pub removed_functions: Vec<String>,
    /// Same name, different callee set
    pub modified_functions: Vec<String>,
    pub added_edges: Vec<CallEdge>,
    pub removed_edges: Vec<CallEdge>,
}

impl CallGraphDiff {
    pub fn is_empty(&self) -> bool {
        self.added_functions.is_empty()
            && self.removed_functions.is_empty()
            && self.modified_functions.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
    }
}

/// Compare two extractions by set difference
///
/// Equal fingerprints short-circuit to an empty diff. All output lists are
/// sorted.
pub fn diff(old: &FileCallGraph, new: &FileCallGraph) -> CallGraphDiff {
    if old.fingerprint == new.fingerprint {
        return CallGraphDiff::default();
    }

    let old_names = old.function_names();
    let new_names = new.function_names();

    let added_functions = new_names.difference(&old_names).map(|s| s.to_string()).collect();
    let removed_functions = old_names.difference(&new_names).map(|s| s.to_string()).collect();

    let modified_functions = old_names
        .intersection(&new_names)
        .filter(|name| {
            let before = old.function(name).map(|f| &f.calls);
            let after = new.function(name).map(|f| &f.calls);
            before != after
        })
        .map(|s| s.to_string())
        .collect();

    let old_edges = old.call_edges();
    let new_edges = new.call_edges();

    CallGraphDiff {
        added_functions,
        removed_functions,
        modified_functions,
        added_edges: edge_difference(&new_edges, &old_edges),
        removed_edges: edge_difference(&old_edges, &new_edges),
    }
}

fn edge_difference(a: &BTreeSet<(&str, &str)>, b: &BTreeSet<(&str, &str)>) -> Vec<CallEdge> {
    a.difference(b)
        .map(|(caller, callee)| CallEdge::new(*caller, *callee))
        .collect()
}
