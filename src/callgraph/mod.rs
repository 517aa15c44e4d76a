//! Language-aware call graph extraction and diffing
//!
//! The extractor is purely syntactic. It is used for two things: the
//! structural content hash, and local updates that patch a cached file
//! entry without going back to the external analyzer.

pub mod diff;
pub mod extract;
pub mod grammar;

pub use diff::{diff, CallEdge, CallGraphDiff};
pub use extract::{
    extract_call_graph, simple_name, structural_fingerprint, CallSite, FileCallGraph, FunctionDef,
};
