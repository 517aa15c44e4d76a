//! codag-engine: incremental workflow graph cache
//!
//! Stores per-file analyzer output keyed by content hash, keeps cross-file
//! edges in a registry of their own, and merges everything on demand into a
//! graph of nodes, edges and workflows. Small edits are patched locally from
//! a tree-sitter call graph diff instead of re-running the analyzer.
//!
//! # Supported Languages
//!
//! - TypeScript, TSX, JavaScript, JSX
//! - Python
//! - Rust
//! - Go
//! - Java
//!
//! # Example
//!
//! ```ignore
//! use codag_engine::{AnalysisCache, AnalysisResult, CacheConfig};
//! use std::collections::BTreeMap;
//!
//! let cache = AnalysisCache::in_memory(CacheConfig::default());
//! let result: AnalysisResult = serde_json::from_str(&analyzer_output)?;
//!
//! let mut contents = BTreeMap::new();
//! contents.insert("src/agent.ts".to_string(), source);
//! cache.store(&result, &contents)?;
//!
//! let graph = cache.get_merged_graph(&[]);
//! println!("{} workflows", graph.workflows.len());
//! ```

pub mod cache;
pub mod callgraph;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod lang;
pub mod local_update;
pub mod merge;
pub mod mermaid;
pub mod node_id;
pub mod paths;
pub mod patterns;
pub mod persistence;
pub mod schema;
pub mod state;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use cache::CacheDir;
pub use callgraph::{diff, extract_call_graph, CallEdge, CallGraphDiff, FileCallGraph};
pub use config::{CacheConfig, CACHE_VERSION};
pub use error::{CodagError, Result};
pub use fingerprint::{content_hash, fingerprint, ContentFingerprint};
pub use lang::{Lang, LangFamily};
pub use local_update::{LocalUpdateApplier, LocalUpdateOutcome};
pub use merge::{MergeStats, MergedGraph, MergedGraphBuilder};
pub use node_id::NodeId;
pub use paths::{normalize_path, relative_key};
pub use persistence::{BlobStore, FsBlobStore, MemoryBlobStore, PersistedCache};
pub use schema::{
    fnv1a_hash, merge_graphs, AnalysisResult, CrossFileEdge, Edge, FileCacheEntry, Graph, Node, NodeKind,
    SourceLocation, WorkflowGroup, WorkflowSummary,
};
pub use state::{AnalysisCache, AnalysisSession, CacheStats, PendingNode};
pub use store::{CrossFileEdgeRegistry, FileAnalysisStore, NodeIdResolver, StoredBatch};
pub use workflow::{WorkflowComputer, WorkflowOptions};
