//! Persistent analysis state: per-file entries, the cross-file edge
//! registry, and read-time id resolution

pub mod cross_file;
pub mod files;
pub mod resolver;

pub use cross_file::CrossFileEdgeRegistry;
pub use files::{FileAnalysisStore, StoredBatch};
pub use resolver::NodeIdResolver;
