//! CLI argument definitions for the `codag` binary
//!
//! Every command prints JSON to stdout; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Incremental workflow graph cache for analyzer output
#[derive(Parser, Debug)]
#[command(name = "codag")]
#[command(about = "Caches per-file analyzer output and merges it into a workflow graph")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root (defaults to the current directory)
    #[arg(short, long, global = true, env = "CODAG_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

// ============================================
// Main Commands Enum
// ============================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the content hash of a file and whether it is structural
    Hash(FileArgs),

    /// Print the call graph extracted from a file
    Extract(FileArgs),

    /// Store an analyzer response for a set of files
    Ingest(IngestArgs),

    /// Print the merged workflow graph, optionally narrowed to files
    Graph(GraphArgs),

    /// Patch a cached file from its current content
    #[command(visible_alias = "u")]
    Update(FileArgs),

    /// Drop the cached entry for a file
    Invalidate(InvalidateArgs),

    /// Drop entries for files that no longer exist
    Prune,

    /// Drop everything
    Clear,

    /// Print cache counters
    Status,
}

// ============================================
// Command Arguments
// ============================================

#[derive(Args, Debug)]
pub struct FileArgs {
    /// Source file, relative to the workspace
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Analyzer response file (`-` for stdin)
    pub response: PathBuf,

    /// Files the response covers
    #[arg(long, num_args = 1.., required = true)]
    pub files: Vec<PathBuf>,

    /// Response is Mermaid with a metadata section instead of graph JSON
    #[arg(long)]
    pub mermaid: bool,
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Only workflows touching these files
    pub paths: Vec<String>,
}

#[derive(Args, Debug)]
pub struct InvalidateArgs {
    /// Cached file to drop
    pub path: String,
}
