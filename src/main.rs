//! codag CLI entry point

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ignore::WalkBuilder;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use codag_engine::cli::{Cli, Commands, FileArgs, IngestArgs};
use codag_engine::{
    extract_call_graph, fingerprint, mermaid, relative_key, AnalysisCache, AnalysisResult, CacheDir, CodagError,
    Graph,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<CodagError>() {
                Some(err) => err.exit_code(),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "codag_engine=debug" } else { "codag_engine=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("current directory unavailable")?,
    };
    let dir = CacheDir::for_workspace(&workspace);

    // Read-only commands never touch the cache directory
    let output = match &cli.command {
        Commands::Hash(args) => run_hash(&dir, args)?,
        Commands::Extract(args) => run_extract(&dir, args)?,
        _ => {
            dir.init()?;
            let config = dir.load_config()?;
            let cache = AnalysisCache::open(Arc::new(dir.blob_store()), config);
            let output = run_with_cache(&cli.command, &dir, &cache);
            cache.flush().await;
            output?
        }
    };

    Ok(serde_json::to_string_pretty(&output)?)
}

fn run_with_cache(command: &Commands, dir: &CacheDir, cache: &AnalysisCache) -> anyhow::Result<Value> {
    match command {
        Commands::Ingest(args) => run_ingest(dir, cache, args),
        Commands::Graph(args) => Ok(serde_json::to_value(cache.get_merged_graph(&args.paths))?),
        Commands::Update(args) => {
            let (key, content) = read_workspace_file(dir, &args.file)?;
            let outcome = cache.apply_local_update(&key, &content)?;
            Ok(serde_json::to_value(outcome)?)
        }
        Commands::Invalidate(args) => {
            let removed = cache.invalidate_file(&args.path);
            Ok(json!({ "path": args.path, "removed": removed }))
        }
        Commands::Prune => {
            let existing = workspace_files(&dir.workspace_root);
            let pruned = cache.prune_stale(&existing);
            Ok(json!({ "pruned": pruned }))
        }
        Commands::Clear => {
            cache.clear();
            Ok(json!({ "cleared": true }))
        }
        Commands::Status => Ok(json!({
            "cacheDir": dir.root.display().to_string(),
            "sizeBytes": dir.size(),
            "stats": cache.stats(),
        })),
        Commands::Hash(args) => run_hash(dir, args),
        Commands::Extract(args) => run_extract(dir, args),
    }
}

// ============================================
// Commands
// ============================================

fn run_hash(dir: &CacheDir, args: &FileArgs) -> anyhow::Result<Value> {
    let (key, content) = read_workspace_file(dir, &args.file)?;
    let fp = fingerprint(&key, &content);
    Ok(json!({
        "path": key,
        "hash": fp.hash,
        "structural": fp.structural,
    }))
}

fn run_extract(dir: &CacheDir, args: &FileArgs) -> anyhow::Result<Value> {
    let (key, content) = read_workspace_file(dir, &args.file)?;
    let graph = extract_call_graph(&key, &content)?;
    Ok(serde_json::to_value(graph)?)
}

fn run_ingest(dir: &CacheDir, cache: &AnalysisCache, args: &IngestArgs) -> anyhow::Result<Value> {
    let response = read_response(&args.response)?;
    let result = if args.mermaid {
        mermaid::parse_response(&response)?
    } else {
        parse_json_response(&response)?
    };

    let mut contents = BTreeMap::new();
    for file in &args.files {
        let (key, content) = read_workspace_file(dir, file)?;
        contents.insert(key, content);
    }

    let batch = cache.store(&result, &contents)?;
    Ok(json!({
        "files": batch.files,
        "nodesStored": batch.nodes_stored,
        "nodesDropped": batch.nodes_dropped,
        "internalEdges": batch.internal_edges,
        "crossFileEdges": batch.cross_file_edges.len(),
    }))
}

// ============================================
// Helpers
// ============================================

/// Accepts either a bare analysis result or a graph with workflow groups
fn parse_json_response(response: &str) -> Result<AnalysisResult, CodagError> {
    let value: Value = serde_json::from_str(response)?;
    if value.get("workflows").is_some() {
        let graph: Graph = serde_json::from_value(value)?;
        Ok(AnalysisResult::from_graph(graph))
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

fn read_response(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("reading response {}", path.display()))
}

/// Read a file given relative to the workspace (or absolute); returns its cache key
fn read_workspace_file(dir: &CacheDir, file: &Path) -> Result<(String, String), CodagError> {
    let full: PathBuf = if file.is_absolute() {
        file.to_path_buf()
    } else {
        dir.workspace_root.join(file)
    };
    if !full.is_file() {
        return Err(CodagError::FileNotFound {
            path: full.display().to_string(),
        });
    }
    let content = fs::read_to_string(&full)?;
    let full = full.canonicalize().unwrap_or(full);
    Ok((relative_key(&full, &dir.workspace_root), content))
}

/// Every file under the workspace, as cache keys
fn workspace_files(root: &Path) -> BTreeSet<String> {
    let mut builder = WalkBuilder::new(root);
    builder.follow_links(false);
    builder.hidden(true);

    builder
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| relative_key(entry.path(), root))
        .collect()
}
