//! The `codag` binary end to end

use crate::common::*;

fn ingest_pair(ws: &TestWorkspace) {
    ws.add_file("A.ts", CONFIG_TS);
    ws.add_file("B.ts", HANDLER_TS);
    let response = serde_json::to_string(&config_and_handler()).unwrap();
    ws.add_file("response.json", &response);

    let stored = ws.run_json(&["ingest", "--files", "A.ts", "B.ts", "--", "response.json"]);
    assert_eq!(stored["nodesStored"], 2);
    assert_eq!(stored["crossFileEdges"], 1);
}

#[test]
fn test_hash_reports_structural_flavor() {
    let ws = TestWorkspace::new();
    ws.add_file("A.ts", CONFIG_TS);

    let out = ws.run_json(&["hash", "A.ts"]);
    assert_eq!(out["path"], "A.ts");
    assert_eq!(out["structural"], true);
    assert!(!ws.path().join(".codag").exists());
}

#[test]
fn test_extract_lists_functions() {
    let ws = TestWorkspace::new();
    ws.add_file("B.ts", HANDLER_TS);

    let out = ws.run_json(&["extract", "B.ts"]);
    let names: Vec<&str> = out["functions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert_eq!(names, vec!["handler"]);
}

#[test]
fn test_ingest_then_graph() {
    let ws = TestWorkspace::new();
    ingest_pair(&ws);

    let graph = ws.run_json(&["graph"]);
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(graph["workflows"].as_array().unwrap().len(), 1);
    assert!(ws.path().join(".codag/analysis-cache.json").exists());
    assert!(ws.path().join(".codag/graph.json").exists());
}

#[test]
fn test_update_removes_deleted_function() {
    let ws = TestWorkspace::new();
    ingest_pair(&ws);
    ws.add_file("B.ts", HANDLER_REMOVED_TS);

    let outcome = ws.run_json(&["update", "B.ts"]);
    assert_eq!(outcome["removedNodes"][0], "B.ts::handler");

    let graph = ws.run_json(&["graph"]);
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 1);
    assert_eq!(graph["workflows"][0]["nodeIds"][0], "A.ts::loadConfig");
}

#[test]
fn test_update_of_unchanged_file_is_a_noop() {
    let ws = TestWorkspace::new();
    ws.add_file("A.ts", CONFIG_TS);
    ws.add_file("B.ts", HANDLER_WITH_HELPERS_TS);
    let response = serde_json::to_string(&config_and_handler()).unwrap();
    ws.add_file("response.json", &response);
    ws.run_json(&["ingest", "--files", "A.ts", "B.ts", "--", "response.json"]);

    // each command is a fresh process
    for _ in 0..2 {
        let outcome = ws.run_json(&["update", "B.ts"]);
        assert_eq!(outcome["addedNodes"], serde_json::json!([]));
        assert_eq!(outcome["removedNodes"], serde_json::json!([]));
        assert_eq!(outcome["addedEdges"], 0);
    }

    let status = ws.run_json(&["status"]);
    assert_eq!(status["stats"]["pendingEnrichment"], 0);
}

#[test]
fn test_prune_and_status() {
    let ws = TestWorkspace::new();
    ingest_pair(&ws);
    ws.remove_file("B.ts");

    let pruned = ws.run_json(&["prune"]);
    assert_eq!(pruned["pruned"][0], "B.ts");

    let status = ws.run_json(&["status"]);
    assert_eq!(status["stats"]["files"], 1);
    assert_eq!(status["stats"]["crossFileEdges"], 0);
}

#[test]
fn test_invalidate_and_clear() {
    let ws = TestWorkspace::new();
    ingest_pair(&ws);

    assert_eq!(ws.run_json(&["invalidate", "A.ts"])["removed"], true);
    assert_eq!(ws.run_json(&["invalidate", "A.ts"])["removed"], false);

    ws.run_json(&["clear"]);
    assert_eq!(ws.run_json(&["status"])["stats"]["files"], 0);
}

#[test]
fn test_mermaid_ingest() {
    let ws = TestWorkspace::new();
    ws.add_file("agent.py", "def ask():\n    return client.chat.completions.create()\n");
    ws.add_file(
        "response.md",
        "```mermaid\nflowchart TD\n    %% Workflow: Answering\n    A[Receive] --> B([Ask Model])\n---\nmetadata:\nA: {file: \"agent.py\", line: 1, function: \"ask\", type: \"step\"}\nB: {file: \"agent.py\", line: 2, function: \"ask_llm\", type: \"llm\", model: \"gpt-4o\"}\n```\n",
    );

    let stored = ws.run_json(&["ingest", "--mermaid", "--files", "agent.py", "--", "response.md"]);
    assert_eq!(stored["nodesStored"], 2);

    let graph = ws.run_json(&["graph"]);
    assert_eq!(graph["workflows"].as_array().unwrap().len(), 1);
    assert_eq!(graph["workflows"][0]["name"], "Answering");
}

#[test]
fn test_missing_file_exit_code() {
    let ws = TestWorkspace::new();
    let output = ws.run(&["hash", "nope.ts"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("File not found"));
}
