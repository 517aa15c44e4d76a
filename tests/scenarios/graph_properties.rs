//! Properties that hold for any input: idempotence, invalidation,
//! content addressing, graph union, stub uniqueness

use std::collections::BTreeMap;

use codag_engine::{
    content_hash, merge_graphs, AnalysisCache, CacheConfig, CrossFileEdgeRegistry, Edge, FileAnalysisStore, Graph,
    MergedGraphBuilder, Node, NodeKind, WorkflowComputer, WorkflowOptions,
};

use crate::common::*;

#[test]
fn test_workflow_computation_is_idempotent() {
    let nodes = vec![
        llm("a.py", "ask", 1),
        step("a.py", "prepare", 5),
        step("b.py", "parse", 1),
        step("c.py", "render", 1),
        llm("c.py", "describe", 9),
    ];
    let edges = vec![
        Edge::new("a.py::prepare", "a.py::ask"),
        Edge::new("a.py::ask", "b.py::parse"),
        Edge::new("c.py::render", "c.py::describe"),
        Edge::new("c.py::describe", "b.py::parse"),
    ];
    let mut labels = BTreeMap::new();
    labels.insert("a.py::ask".to_string(), "Question Answering".to_string());
    labels.insert("c.py::describe".to_string(), "Description".to_string());

    let computer = WorkflowComputer::new(WorkflowOptions::default());
    let first = computer.compute(&nodes, &edges, &labels);
    let second = computer.compute(&nodes, &edges, &labels);
    assert_eq!(first, second);
    assert!(!first.is_empty());

    // every node in at most one workflow
    let mut seen = std::collections::BTreeSet::new();
    for workflow in &first {
        for id in &workflow.node_ids {
            assert!(seen.insert(id.clone()), "{} assigned twice", id);
        }
    }
}

#[test]
fn test_repeated_merges_are_identical() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    cache
        .store(&config_and_handler(), &config_and_handler_contents())
        .unwrap();
    let first = cache.get_merged_graph(&[]);
    cache.invalidate_file("missing.ts");
    assert_eq!(first, cache.get_merged_graph(&[]));
}

#[test]
fn test_invalidated_file_is_never_valid() {
    let cache = AnalysisCache::in_memory(CacheConfig::default());
    let files = config_and_handler_contents();
    cache.store(&config_and_handler(), &files).unwrap();

    let hash = cache.file_hash("A.ts", CONFIG_TS);
    assert!(cache.is_file_valid("A.ts", &hash));

    assert!(cache.invalidate_file("A.ts"));
    for candidate in [hash.as_str(), "", "0000000000000000"] {
        assert!(!cache.is_file_valid("A.ts", candidate));
    }
    assert_eq!(cache.files_needing_analysis(&files), vec!["A.ts"]);
}

#[test]
fn test_comment_edits_keep_hash_and_new_call_changes_it() {
    let commented = CONFIG_TS
        .replace("const client", "/* shared */ const   client")
        .replace("    return", "\t\treturn");
    assert_eq!(content_hash("A.ts", CONFIG_TS), content_hash("A.ts", &commented));

    let extra_call = format!(
        "{}export async function again() {{\n    return client.chat.completions.create({{}});\n}}\n",
        CONFIG_TS
    );
    assert_ne!(content_hash("A.ts", CONFIG_TS), content_hash("A.ts", &extra_call));
}

#[test]
fn test_merge_graphs_identity_and_order_independence() {
    assert_eq!(merge_graphs(&[]), Graph::default());

    let g1 = Graph {
        nodes: vec![llm("a.ts", "ask", 1), step("a.ts", "prep", 2)],
        edges: vec![Edge::new("a.ts::prep", "a.ts::ask")],
        ..Default::default()
    };
    let g2 = Graph {
        nodes: vec![
            Node::new("a.ts::ask", "Ask Again", NodeKind::Step),
            step("b.ts", "use", 1),
        ],
        edges: vec![Edge::new("b.ts::use", "a.ts::ask"), Edge::new("a.ts::prep", "a.ts::ask")],
        ..Default::default()
    };

    assert_eq!(merge_graphs(std::slice::from_ref(&g1)), g1);

    let forward = merge_graphs(&[g1.clone(), g2.clone()]);
    let backward = merge_graphs(&[g2, g1]);
    assert_eq!(forward.node_ids(), backward.node_ids());
    assert_eq!(forward.edge_keys(), backward.edge_keys());
    assert_eq!(forward.nodes.len(), 3);
    assert_eq!(forward.edges.len(), 2);
}

#[test]
fn test_one_stub_per_unresolved_id_across_merges() {
    let mut store = FileAnalysisStore::new();
    let mut registry = CrossFileEdgeRegistry::new();
    let mut result = config_and_handler();
    result.edges.push(Edge::new("A.ts::loadConfig", "lib/io.ts::readFile::4"));
    result.edges.push(Edge::new("B.ts::handler", "lib/io.ts::readFile::4"));
    result.edges.push(Edge::new("B.ts::handler", "./lib/io.ts::readFile::4"));

    let hashes: BTreeMap<String, String> = [("A.ts", "h1"), ("B.ts", "h2")]
        .iter()
        .map(|(p, h)| (p.to_string(), h.to_string()))
        .collect();
    let batch = store.store(&result, &hashes);
    registry.replace_for_files(&batch.files, batch.cross_file_edges);

    let builder = MergedGraphBuilder::new(&store, &registry, &CacheConfig::default());
    let first = builder.build();
    let second = builder.build();
    for merged in [&first, &second] {
        let stubs: Vec<_> = merged
            .graph
            .nodes
            .iter()
            .filter(|n| n.id.starts_with("lib/io.ts::readFile"))
            .collect();
        assert_eq!(stubs.len(), 1);
        assert_eq!(merged.stats.stub_nodes, 1);
    }
    assert_eq!(first.graph, second.graph);
}
