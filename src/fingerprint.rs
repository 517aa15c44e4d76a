//! Content fingerprinting for cache validity
//!
//! Two flavors: a raw hash of the bytes, and a structural hash over the
//! parts of a file that matter to the graph (client imports, client-bound
//! variables, external call sites). Structural hashing makes whitespace,
//! comment and column edits invisible to the cache.
//!
//! Writing and checking must hash identically, so both go through
//! [`content_hash`] / [`fingerprint`] and share one fallback rule: when
//! structural extraction fails or finds no client imports and no external
//! call sites, the raw hash is used.

use crate::callgraph::{extract_call_graph, FileCallGraph};
use crate::schema::fnv1a_hex;

/// Hash of a file plus the extraction it was derived from
#[derive(Debug, Clone)]
pub struct ContentFingerprint {
    pub hash: String,
    /// Whether `hash` is the structural flavor
    pub structural: bool,
    /// The extraction, when the file parsed
    pub call_graph: Option<FileCallGraph>,
}

/// Hash of the exact bytes
pub fn raw_hash(content: &str) -> String {
    fnv1a_hex(content)
}

/// Structural hash of an extraction, or `None` when it has nothing
/// relevant to hash
pub fn structural_hash(graph: &FileCallGraph) -> Option<String> {
    let mut imports: Vec<&str> = graph.client_imports();
    let mut call_sites: Vec<(u32, &str)> = graph
        .external_calls()
        .map(|c| (c.line, c.function.as_deref().unwrap_or("")))
        .collect();

    if imports.is_empty() && call_sites.is_empty() {
        return None;
    }

    imports.sort_unstable();
    call_sites.sort();

    let mut normalized = String::new();
    for import in imports {
        normalized.push_str("import:");
        normalized.push_str(import);
        normalized.push('\n');
    }
    for var in &graph.tracked_vars {
        normalized.push_str("var:");
        normalized.push_str(var);
        normalized.push('\n');
    }
    for (line, function) in call_sites {
        normalized.push_str(&format!("call:{}:llm:{}\n", line, function));
    }

    Some(fnv1a_hex(&normalized))
}

/// Fingerprint a file, keeping the extraction for later diffing
pub fn fingerprint(path: &str, content: &str) -> ContentFingerprint {
    let call_graph = match extract_call_graph(path, content) {
        Ok(graph) => Some(graph),
        Err(e) => {
            tracing::trace!("Structural hash unavailable for {}: {}", path, e);
            None
        }
    };

    let (hash, structural) = hash_extracted(call_graph.as_ref(), content);
    ContentFingerprint {
        hash,
        structural,
        call_graph,
    }
}

/// Hash for content whose extraction is already at hand
///
/// Returns the hash and whether it is the structural flavor.
pub fn hash_extracted(call_graph: Option<&FileCallGraph>, content: &str) -> (String, bool) {
    match call_graph.and_then(structural_hash) {
        Some(hash) => (hash, true),
        None => (raw_hash(content), false),
    }
}

/// The hash stored in, and compared against, a file's cache entry
pub fn content_hash(path: &str, content: &str) -> String {
    fingerprint(path, content).hash
}
