//! Loading and writing the persisted cache document

use std::sync::Arc;

use serde_json::{json, Value};

use codag_engine::{
    AnalysisCache, AnalysisResult, BlobStore, CacheConfig, CacheDir, Edge, MemoryBlobStore, Node, NodeKind,
    CACHE_VERSION,
};

use crate::common::*;

const CACHE_KEY: &str = "analysis-cache.json";

fn read_json(blob: &dyn BlobStore, key: &str) -> Value {
    let bytes = blob.read(key).unwrap().expect("blob written");
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_old_version_loads_empty_and_repopulates() {
    let blob = Arc::new(MemoryBlobStore::new());
    let old = json!({
        "version": 1,
        "files": {
            "A.ts": { "contentHash": "abc", "nodes": [], "internalEdges": [], "timestamp": 1 }
        },
        "crossFileEdges": []
    });
    blob.write(CACHE_KEY, old.to_string().as_bytes()).unwrap();

    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    assert_eq!(cache.stats().files, 0);
    assert!(!cache.is_file_valid("A.ts", "abc"));

    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();
    cache.flush().await;

    let doc = read_json(&*blob, CACHE_KEY);
    assert_eq!(doc["version"], json!(CACHE_VERSION));
    assert_eq!(doc["version"], json!(2));
    assert!(doc["files"]["A.ts"].is_object());
    assert!(doc["files"]["B.ts"].is_object());
    assert_eq!(doc["crossFileEdges"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_malformed_document_is_empty_cache() {
    let blob = Arc::new(MemoryBlobStore::new());
    blob.write(CACHE_KEY, b"{ not json").unwrap();

    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    assert_eq!(cache.stats().files, 0);
}

#[tokio::test]
async fn test_reopen_restores_entries_and_edges() {
    let temp = tempfile::tempdir().unwrap();
    let dir = CacheDir::at(temp.path().join(".codag"), temp.path());
    dir.init().unwrap();

    {
        let cache = AnalysisCache::open(Arc::new(dir.blob_store()), CacheConfig::default());
        cache
            .store(&config_and_handler(), &config_and_handler_contents())
            .unwrap();
        cache.flush().await;
    }

    let cache = AnalysisCache::open(Arc::new(dir.blob_store()), CacheConfig::default());
    let hash = cache.file_hash("B.ts", HANDLER_TS);
    assert!(cache.is_file_valid("B.ts", &hash));
    assert_eq!(cache.stats().cross_file_edges, 1);

    let graph = cache.get_merged_graph(&[]);
    assert_eq!(graph.workflows.len(), 1);
    assert_eq!(graph.nodes.len(), 2);
}

#[tokio::test]
async fn test_merge_writes_plain_snapshot() {
    let blob = Arc::new(MemoryBlobStore::new());
    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();
    let graph = cache.get_merged_graph(&[]);
    cache.flush().await;

    let snapshot = read_json(&*blob, "graph.json");
    assert_eq!(snapshot["nodes"].as_array().unwrap().len(), graph.nodes.len());
    assert_eq!(snapshot["workflows"].as_array().unwrap().len(), 1);
    assert!(snapshot.get("files").is_none());

    let doc = read_json(&*blob, CACHE_KEY);
    assert_eq!(doc["workflows"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_local_update_after_reopen_uses_cached_entry() {
    let blob = Arc::new(MemoryBlobStore::new());
    {
        let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
        cache
            .store(&config_and_handler(), &config_and_handler_contents())
            .unwrap();
        cache.flush().await;
    }

    // no in-memory extraction after reopen: the baseline is the persisted callee map
    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    let outcome = cache.apply_local_update("B.ts", HANDLER_REMOVED_TS).unwrap();
    assert_eq!(outcome.removed_nodes, vec!["B.ts::handler"]);
    assert_eq!(cache.get_merged_graph(&[]).workflows[0].node_ids, vec!["A.ts::loadConfig"]);
}

#[tokio::test]
async fn test_unchanged_file_after_reopen_is_a_noop() {
    let blob = Arc::new(MemoryBlobStore::new());
    let files = contents(&[("A.ts", CONFIG_TS), ("B.ts", HANDLER_WITH_HELPERS_TS)]);
    {
        let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
        cache.store(&config_and_handler(), &files).unwrap();
        cache.flush().await;
    }

    let doc = read_json(&*blob, CACHE_KEY);
    let functions = doc["files"]["B.ts"]["functions"].as_object().unwrap();
    assert_eq!(functions.len(), 3);
    assert_eq!(functions["helper"], json!(["fmt"]));

    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    let outcome = cache.apply_local_update("B.ts", HANDLER_WITH_HELPERS_TS).unwrap();
    assert!(outcome.is_noop(), "unexpected changes: {:?}", outcome);
    assert!(cache.take_pending_enrichment().is_empty());
    assert_eq!(cache.get_merged_graph(&[]).nodes.len(), 2);
}

#[tokio::test]
async fn test_symbolic_marker_survives_reopen_until_invalidated() {
    let blob = Arc::new(MemoryBlobStore::new());
    let result = AnalysisResult {
        nodes: vec![
            step("a.ts", "send", 1),
            Node::new(
                "OpenAI",
                "OpenAI Chat",
                NodeKind::Llm {
                    model: Some("gpt-4o".to_string()),
                    temperature: None,
                },
            ),
        ],
        edges: vec![Edge::new("a.ts::send", "OpenAI"), Edge::new("OpenAI", "Moderation")],
        workflow_hints: Default::default(),
    };
    {
        let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
        cache
            .store(&result, &contents(&[("a.ts", "export function send() {}\n")]))
            .unwrap();
        cache.flush().await;
    }

    let doc = read_json(&*blob, CACHE_KEY);
    assert_eq!(doc["files"]["a.ts"]["symbols"][0]["type"], "llm");
    assert_eq!(doc["crossFileEdges"].as_array().unwrap().len(), 2);

    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    let graph = cache.get_merged_graph(&[]);
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.llms_detected, vec!["gpt-4o"]);
    assert!(graph.node("OpenAI").unwrap().is_marker());

    assert!(cache.invalidate_file("a.ts"));
    assert_eq!(cache.stats().cross_file_edges, 0);
    assert!(cache.get_merged_graph(&[]).nodes.is_empty());
}

#[tokio::test]
async fn test_clear_empties_persisted_state() {
    let blob = Arc::new(MemoryBlobStore::new());
    let cache = AnalysisCache::open(blob.clone(), CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();
    cache.get_merged_graph(&[]);
    cache.clear();
    cache.flush().await;

    let doc = read_json(&*blob, CACHE_KEY);
    assert!(doc["files"].as_object().unwrap().is_empty());
    let snapshot = read_json(&*blob, "graph.json");
    assert!(snapshot["nodes"].as_array().unwrap().is_empty());
}
