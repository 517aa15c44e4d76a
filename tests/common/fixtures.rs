//! Analysis results and file contents shared by the scenario tests

use std::collections::BTreeMap;

use codag_engine::{AnalysisResult, Edge, Node, NodeKind};

pub const CONFIG_TS: &str = r#"import OpenAI from "openai";
const client = new OpenAI();
export async function loadConfig() {
    return client.chat.completions.create({ model: "gpt-4o" });
}
"#;

pub const HANDLER_TS: &str = r#"import { loadConfig } from "./A";
export function handler() {
    return loadConfig();
}
"#;

/// Handler plus two helpers the analyzer emits no nodes for
pub const HANDLER_WITH_HELPERS_TS: &str = r#"import { loadConfig } from "./A";
export function handler() {
    return helper(loadConfig());
}
function helper(config) {
    return fmt(config);
}
function fmt(value) {
    return String(value);
}
"#;

pub const HANDLER_REMOVED_TS: &str = r#"import { loadConfig } from "./A";
export const version = 1;
"#;

/// File path to content map
pub fn contents(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect()
}

pub fn step(file: &str, function: &str, line: u32) -> Node {
    Node::new(format!("{}::{}", file, function), function, NodeKind::Step).with_source(file, line, Some(function))
}

pub fn llm(file: &str, function: &str, line: u32) -> Node {
    Node::new(format!("{}::{}", file, function), function, NodeKind::llm()).with_source(file, line, Some(function))
}

/// `A.ts::loadConfig` (marker) called from `B.ts::handler`
pub fn config_and_handler() -> AnalysisResult {
    AnalysisResult {
        nodes: vec![llm("A.ts", "loadConfig", 3), step("B.ts", "handler", 2)],
        edges: vec![Edge::new("B.ts::handler", "A.ts::loadConfig")],
        workflow_hints: BTreeMap::new(),
    }
}

/// Contents matching [`config_and_handler`]
pub fn config_and_handler_contents() -> BTreeMap<String, String> {
    contents(&[("A.ts", CONFIG_TS), ("B.ts", HANDLER_TS)])
}

/// Result for a single file whose only edge points into a file not yet analyzed
pub fn render_calling_into(target: &str) -> AnalysisResult {
    AnalysisResult {
        nodes: vec![step("A.ts", "render", 1)],
        edges: vec![Edge::new("A.ts::render", target)],
        workflow_hints: BTreeMap::new(),
    }
}
