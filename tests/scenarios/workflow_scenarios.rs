//! End-to-end workflow scenarios on an in-memory cache

use std::collections::BTreeMap;

use codag_engine::{AnalysisCache, AnalysisResult, CacheConfig, CodagError, Edge};

use crate::common::*;

#[test]
fn test_cross_file_call_forms_single_workflow() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();

    let graph = cache.get_merged_graph(&[]);
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.workflows.len(), 1);

    let mut members = graph.workflows[0].node_ids.clone();
    members.sort();
    assert_eq!(members, vec!["A.ts::loadConfig", "B.ts::handler"]);
    assert_eq!(cache.stats().cross_file_edges, 1);
}

#[test]
fn test_deleted_handler_leaves_marker_workflow() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();

    let outcome = cache.apply_local_update("B.ts", HANDLER_REMOVED_TS).unwrap();
    assert_eq!(outcome.removed_nodes, vec!["B.ts::handler"]);

    let graph = cache.get_merged_graph(&[]);
    assert!(graph.node("B.ts::handler").is_none());
    assert!(graph.edges.is_empty());
    assert_eq!(graph.workflows.len(), 1);
    assert_eq!(graph.workflows[0].node_ids, vec!["A.ts::loadConfig"]);
    assert_eq!(cache.stats().cross_file_edges, 0);
}

#[test]
fn test_outstanding_batch_keeps_unconfirmed_nodes() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let session = cache.begin_analysis(2);

    cache
        .store_batch(
            &session,
            &render_calling_into("B.ts::summarize"),
            &contents(&[("A.ts", "export function render() { summarize(); }\n")]),
        )
        .unwrap();

    let partial = cache.get_merged_graph(&[]);
    assert!(partial.node("A.ts::render").is_some());
    assert_eq!(cache.stats().outstanding_batches, 1);

    let second = AnalysisResult {
        nodes: vec![llm("B.ts", "summarize", 1)],
        edges: Vec::new(),
        workflow_hints: BTreeMap::new(),
    };
    cache
        .store_batch(
            &session,
            &second,
            &contents(&[("B.ts", "export async function summarize() {}\n")]),
        )
        .unwrap();

    let complete = cache.get_merged_graph(&[]);
    assert_eq!(complete.nodes.len(), 2);
    assert_eq!(complete.workflows.len(), 1);
    assert!(complete.workflow_of("A.ts::render").is_some());
}

#[test]
fn test_unreachable_workflow_filtered_once_batches_finish() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let session = cache.begin_analysis(2);
    cache
        .store_batch(
            &session,
            &render_calling_into("B.ts::format"),
            &contents(&[("A.ts", "export function render() { format(); }\n")]),
        )
        .unwrap();

    let second = AnalysisResult {
        nodes: vec![step("B.ts", "format", 1)],
        edges: Vec::new(),
        workflow_hints: BTreeMap::new(),
    };
    cache
        .store_batch(&session, &second, &contents(&[("B.ts", "export function format() {}\n")]))
        .unwrap();

    assert!(cache.get_merged_graph(&[]).is_empty());
}

#[test]
fn test_failed_batch_does_not_drop_siblings() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let session = cache.begin_analysis(2);
    cache
        .store_batch(&session, &config_and_handler(), &config_and_handler_contents())
        .unwrap();
    cache.fail_batch(&session);

    let stats = cache.stats();
    assert_eq!(stats.outstanding_batches, 0);
    assert_eq!(stats.files, 2);
    assert_eq!(cache.get_merged_graph(&[]).workflows.len(), 1);
}

#[test]
fn test_batch_after_clear_is_discarded() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let session = cache.begin_analysis(1);
    cache.clear();

    let err = cache
        .store_batch(&session, &config_and_handler(), &config_and_handler_contents())
        .unwrap_err();
    assert!(matches!(err, CodagError::StaleSession { .. }));
    assert!(cache.get_merged_graph(&[]).is_empty());
}

#[test]
fn test_reanalysis_replaces_cross_file_edges() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();

    // B.ts reanalyzed: handler no longer calls loadConfig
    let rerun = AnalysisResult {
        nodes: vec![step("B.ts", "handler", 2)],
        edges: Vec::new(),
        workflow_hints: BTreeMap::new(),
    };
    cache
        .store(&rerun, &contents(&[("B.ts", HANDLER_REMOVED_TS)]))
        .unwrap();

    assert_eq!(cache.stats().cross_file_edges, 0);
    let graph = cache.get_merged_graph(&[]);
    assert!(graph.node("B.ts::handler").is_none());
    assert_eq!(graph.workflows.len(), 1);
}

#[test]
fn test_incremental_batch_keeps_prior_labels() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let mut first = config_and_handler();
    first.workflow_hints.insert("A.ts::loadConfig".to_string(), "Config Loading".to_string());
    first.workflow_hints.insert("B.ts::handler".to_string(), "Config Loading".to_string());
    cache.store(&first, &config_and_handler_contents()).unwrap();

    // A later batch for B.ts without hints keeps handler's label
    let mut second = config_and_handler();
    second.nodes.retain(|n| n.id == "B.ts::handler");
    cache.store(&second, &contents(&[("B.ts", HANDLER_TS)])).unwrap();

    let graph = cache.get_merged_graph(&[]);
    assert_eq!(graph.workflows.len(), 1);
    assert_eq!(graph.workflows[0].name, "Config Loading");
    assert_eq!(graph.workflows[0].node_ids.len(), 2);
}

#[test]
fn test_paths_query_narrows_to_touching_workflows() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let mut result = config_and_handler();
    result.nodes.push(llm("C.ts", "classify", 1));
    let mut files = config_and_handler_contents();
    files.insert("C.ts".to_string(), "export function classify() {}\n".to_string());
    cache.store(&result, &files).unwrap();

    assert_eq!(cache.get_merged_graph(&[]).workflows.len(), 2);

    let narrowed = cache.get_merged_graph(&["C.ts".to_string()]);
    assert_eq!(narrowed.workflows.len(), 1);
    assert_eq!(narrowed.nodes.len(), 1);
    assert!(narrowed.node("C.ts::classify").is_some());
}

#[test]
fn test_added_function_is_wired_and_queued_for_enrichment() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();

    let extended = format!(
        "{}export function retry() {{\n    return loadConfig();\n}}\n",
        HANDLER_TS
    );
    let outcome = cache.apply_local_update("B.ts", &extended).unwrap();
    assert_eq!(outcome.added_nodes, vec!["B.ts::retry"]);

    let graph = cache.get_merged_graph(&[]);
    assert!(graph
        .edges
        .iter()
        .any(|e| e.source == "B.ts::retry" && e.target == "A.ts::loadConfig"));
    assert_eq!(graph.workflows.len(), 1);
    assert_eq!(graph.workflows[0].node_ids.len(), 3);

    let pending = cache.take_pending_enrichment();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].node.label, "Retry");
}

#[test]
fn test_prune_removes_missing_files() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();

    let existing = ["A.ts".to_string()].into_iter().collect();
    assert_eq!(cache.prune_stale(&existing), vec!["B.ts"]);
    assert_eq!(cache.stats().files, 1);
    assert_eq!(cache.stats().cross_file_edges, 0);
}

#[test]
fn test_symbolic_target_becomes_navigable_stub() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let mut result = config_and_handler();
    result.edges.push(Edge::new("A.ts::loadConfig", "openai_api"));
    cache.store(&result, &config_and_handler_contents()).unwrap();

    let graph = cache.get_merged_graph(&[]);
    let stub = graph.node("openai_api").expect("stub for symbolic target");
    let source = stub.source.as_ref().expect("stub positioned at caller");
    assert_eq!(source.file, "A.ts");
    assert_eq!(source.line, 3);
    assert_eq!(graph.workflows.len(), 1);
    assert_eq!(graph.workflows[0].node_ids.len(), 3);
}
