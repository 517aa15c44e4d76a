//! Syntactic call graph extraction for a single file
//!
//! Pure function of `(path, source)`: no cache access, no I/O. The output
//! lists every named function with its callees, every import statement, and
//! every call site, with calls matching known external API signatures
//! flagged.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use super::grammar::{grammar_for, CallGrammar};
use crate::error::{CodagError, Result};
use crate::lang::Lang;
use crate::patterns::{is_client_reference, is_external_call};
use crate::schema::fnv1a_hex;

/// Longest rendering kept for callee expressions that are not plain
/// identifiers or member chains
const MAX_EXPR_LEN: usize = 40;

/// A function or method definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDef {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub is_async: bool,
    pub params: Vec<String>,
    /// Simple names of everything this function calls
    pub calls: BTreeSet<String>,
    /// Whether any call in the body matches an external API signature
    pub has_external_call: bool,
}

/// One call expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    /// Dotted callee, e.g. `client.chat.completions.create`
    pub callee: String,
    pub line: u32,
    /// Innermost enclosing named function, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub is_external: bool,
}

impl CallSite {
    /// Last segment of the dotted callee
    pub fn simple_name(&self) -> &str {
        simple_name(&self.callee)
    }
}

/// Everything extracted from one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCallGraph {
    pub language: String,
    /// Ordered by start line
    pub functions: Vec<FunctionDef>,
    /// Whitespace-collapsed import statements, in document order
    pub imports: Vec<String>,
    pub calls: Vec<CallSite>,
    /// Variables initialized from an external client
    pub tracked_vars: BTreeSet<String>,
    /// Hash of the sorted `function:[callees]` pairs (line-insensitive)
    pub fingerprint: String,
}

impl FileCallGraph {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_names(&self) -> BTreeSet<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// `(caller, callee)` pairs by simple name
    pub fn call_edges(&self) -> BTreeSet<(&str, &str)> {
        self.functions
            .iter()
            .flat_map(|f| f.calls.iter().map(move |c| (f.name.as_str(), c.as_str())))
            .collect()
    }

    /// Imports that reference an external client library
    pub fn client_imports(&self) -> Vec<&str> {
        self.imports
            .iter()
            .filter(|i| is_client_reference(i))
            .map(String::as_str)
            .collect()
    }

    pub fn external_calls(&self) -> impl Iterator<Item = &CallSite> {
        self.calls.iter().filter(|c| c.is_external)
    }
}

/// Parse a file and extract its call graph
pub fn extract_call_graph(path: &str, source: &str) -> Result<FileCallGraph> {
    let lang = Lang::from_key(path)?;

    let mut parser = Parser::new();
    parser
        .set_language(&lang.tree_sitter_language())
        .map_err(|e| CodagError::ParseFailure {
            message: format!("Failed to set language for {}: {:?}", path, e),
        })?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| CodagError::ParseFailure {
            message: format!("Failed to parse file: {}", path),
        })?;

    Ok(extract_from_tree(
        lang,
        grammar_for(lang.family()),
        &tree.root_node(),
        source,
    ))
}

// ============================================================================
// Extraction
// ============================================================================

struct FunctionSpan {
    start_byte: usize,
    end_byte: usize,
    def: FunctionDef,
}

fn extract_from_tree(lang: Lang, grammar: &CallGrammar, root: &Node, source: &str) -> FileCallGraph {
    let mut spans: Vec<FunctionSpan> = Vec::new();
    let mut raw_calls: Vec<(usize, CallSite)> = Vec::new();
    let mut imports: Vec<String> = Vec::new();
    let mut tracked_vars: BTreeSet<String> = BTreeSet::new();

    visit_all(root, |node| {
        let kind = node.kind();

        if grammar.is_function(kind) || grammar.is_lambda(kind) {
            if let Some(name) = function_name(node, source, grammar) {
                spans.push(FunctionSpan {
                    start_byte: node.start_byte(),
                    end_byte: node.end_byte(),
                    def: FunctionDef {
                        name,
                        start_line: line_of(node),
                        end_line: node.end_position().row as u32 + 1,
                        is_async: is_async(node, grammar),
                        params: params_of(node, source, grammar),
                        calls: BTreeSet::new(),
                        has_external_call: false,
                    },
                });
            }
        } else if grammar.is_call(kind) {
            if let Some(callee) = call_target(node, source, grammar) {
                raw_calls.push((node.start_byte(), new_call_site(callee, line_of(node))));
            }
        } else if grammar.is_constructor(kind) {
            if let Some(ty) = node.child_by_field_name(grammar.constructor_field) {
                let callee = render_callee(&ty, source, grammar);
                raw_calls.push((node.start_byte(), new_call_site(callee, line_of(node))));
            }
        } else if grammar.is_import(kind) {
            let text = compact(&node_text(node, source));
            if !imports.contains(&text) {
                imports.push(text);
            }
        } else if grammar.is_binding(kind) {
            if let (Some(name), Some(value)) = (
                node.child_by_field_name(grammar.binding_name_field),
                node.child_by_field_name(grammar.binding_value_field),
            ) {
                if is_client_reference(&node_text(&value, source)) {
                    tracked_vars.insert(compact(&node_text(&name, source)));
                }
            }
        }
    });

    // Attribute each call to its innermost enclosing named function
    for (start, call) in raw_calls.iter_mut() {
        let owner = spans
            .iter_mut()
            .filter(|s| s.start_byte <= *start && *start < s.end_byte)
            .min_by_key(|s| s.end_byte - s.start_byte);
        if let Some(span) = owner {
            span.def.calls.insert(simple_name(&call.callee).to_string());
            span.def.has_external_call |= call.is_external;
            call.function = Some(span.def.name.clone());
        }
    }

    let functions = collapse_duplicates(spans);
    let calls: Vec<CallSite> = raw_calls.into_iter().map(|(_, c)| c).collect();
    let fingerprint = structural_fingerprint(&functions);

    FileCallGraph {
        language: lang.name().to_string(),
        functions,
        imports,
        calls,
        tracked_vars,
        fingerprint,
    }
}

fn new_call_site(callee: String, line: u32) -> CallSite {
    let is_external = is_external_call(&format!("{}(", callee));
    CallSite {
        callee,
        line,
        function: None,
        is_external,
    }
}

/// Overloads and same-named methods on different types share a node id,
/// so they are folded into one definition
fn collapse_duplicates(spans: Vec<FunctionSpan>) -> Vec<FunctionDef> {
    let mut by_name: BTreeMap<String, FunctionDef> = BTreeMap::new();
    for span in spans {
        let def = span.def;
        match by_name.get_mut(&def.name) {
            Some(existing) => {
                existing.calls.extend(def.calls);
                existing.has_external_call |= def.has_external_call;
                existing.is_async |= def.is_async;
            }
            None => {
                by_name.insert(def.name.clone(), def);
            }
        }
    }

    let mut functions: Vec<FunctionDef> = by_name.into_values().collect();
    functions.sort_by(|a, b| a.start_line.cmp(&b.start_line).then_with(|| a.name.cmp(&b.name)));
    functions
}

/// Hash of sorted `name:[callees]` pairs, independent of line numbers
pub fn structural_fingerprint(functions: &[FunctionDef]) -> String {
    let mut pairs: Vec<String> = functions
        .iter()
        .map(|f| {
            let callees: Vec<&str> = f.calls.iter().map(String::as_str).collect();
            format!("{}:[{}]", f.name, callees.join(","))
        })
        .collect();
    pairs.sort();
    fnv1a_hex(&pairs.join(";"))
}

// ============================================================================
// Node helpers
// ============================================================================

/// Visit all nodes in a tree (iterative to avoid stack overflow)
fn visit_all<F>(node: &Node, mut visitor: F)
where
    F: FnMut(&Node),
{
    let mut cursor = node.walk();
    let mut did_visit_children = false;

    loop {
        if !did_visit_children {
            visitor(&cursor.node());
            if cursor.goto_first_child() {
                continue;
            }
        }

        if cursor.goto_next_sibling() {
            did_visit_children = false;
            continue;
        }

        if !cursor.goto_parent() {
            break;
        }
        did_visit_children = true;
    }
}

fn node_text(node: &Node, source: &str) -> String {
    node.utf8_text(source.as_bytes()).unwrap_or("").to_string()
}

fn line_of(node: &Node) -> u32 {
    node.start_position().row as u32 + 1
}

/// Collapse whitespace to single spaces
fn compact(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last segment of a dotted name, without a trailing call marker
pub fn simple_name(callee: &str) -> &str {
    let trimmed = callee.trim_end_matches("()");
    trimmed.rsplit('.').next().unwrap_or(trimmed)
}

fn function_name(node: &Node, source: &str, grammar: &CallGrammar) -> Option<String> {
    if let Some(name) = node.child_by_field_name(grammar.name_field) {
        let name = node_text(&name, source);
        if !name.is_empty() {
            return Some(name);
        }
    }

    if !grammar.is_lambda(node.kind()) {
        return None;
    }

    // Anonymous functions take the name of the binding they initialize
    let parent = node.parent()?;
    let binding = match parent.kind() {
        "variable_declarator" => parent.child_by_field_name("name"),
        "pair" => parent.child_by_field_name("key"),
        "assignment_expression" => parent.child_by_field_name("left"),
        "public_field_definition" => parent.child_by_field_name("name"),
        "field_definition" => parent.child_by_field_name("property"),
        _ => None,
    }?;

    let text = node_text(&binding, source);
    let name = simple_name(text.trim_matches(|c| c == '"' || c == '\''));
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        return None;
    }
    Some(name.to_string())
}

fn is_async(node: &Node, grammar: &CallGrammar) -> bool {
    let Some(token) = grammar.async_token else {
        return false;
    };

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == token {
            return true;
        }
        if child.kind() == "function_modifiers" {
            let mut inner = child.walk();
            if child.children(&mut inner).any(|m| m.kind() == token) {
                return true;
            }
        }
    }
    false
}

fn params_of(node: &Node, source: &str, grammar: &CallGrammar) -> Vec<String> {
    let Some(params) = node.child_by_field_name(grammar.params_field) else {
        // Single-identifier arrow functions: `x => x + 1`
        return node
            .child_by_field_name("parameter")
            .map(|p| vec![node_text(&p, source)])
            .unwrap_or_default();
    };

    let mut names = Vec::new();
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        if !grammar.param_nodes.contains(&child.kind()) {
            continue;
        }
        if let Some(name) = param_name(&child, source) {
            names.push(name);
        }
    }
    names
}

fn param_name(node: &Node, source: &str) -> Option<String> {
    for field in ["name", "pattern", "left"] {
        if let Some(child) = node.child_by_field_name(field) {
            return Some(compact(&node_text(&child, source)));
        }
    }

    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "self_parameter" => Some("self".to_string()),
        _ => {
            let mut cursor = node.walk();
            let first = node
                .named_children(&mut cursor)
                .find(|c| c.kind() == "identifier")
                .map(|c| node_text(&c, source));
            first
        }
    }
}

/// Dotted callee of a call node
fn call_target(node: &Node, source: &str, grammar: &CallGrammar) -> Option<String> {
    if grammar.callee_field.is_empty() {
        // object + name carried on the call node itself
        let name = node_text(&node.child_by_field_name("name")?, source);
        return Some(match node.child_by_field_name("object") {
            Some(object) => format!("{}.{}", render_callee(&object, source, grammar), name),
            None => name,
        });
    }

    let callee = node.child_by_field_name(grammar.callee_field)?;
    Some(render_callee(&callee, source, grammar))
}

/// Render a callee expression as a dotted name
///
/// Member chains resolve to `a.b.c`; intermediate call results render as
/// `f()` so `OpenAI().chat.completions.create` keeps its shape.
fn render_callee(node: &Node, source: &str, grammar: &CallGrammar) -> String {
    if let Some((object_field, property_field)) = grammar.member_fields(node.kind()) {
        let property = node
            .child_by_field_name(property_field)
            .map(|p| node_text(&p, source))
            .unwrap_or_default();
        return match node.child_by_field_name(object_field) {
            Some(object) => format!("{}.{}", render_callee(&object, source, grammar), property),
            None => property,
        };
    }

    if grammar.is_call(node.kind()) {
        return match call_target(node, source, grammar) {
            Some(inner) => format!("{}()", inner),
            None => "_()".to_string(),
        };
    }

    match node.kind() {
        "generic_function" => node
            .child_by_field_name("function")
            .map(|f| render_callee(&f, source, grammar))
            .unwrap_or_default(),
        "await_expression" | "parenthesized_expression" => node
            .named_child(0)
            .map(|inner| render_callee(&inner, source, grammar))
            .unwrap_or_default(),
        _ => {
            let text = compact(&node_text(node, source));
            if text.chars().count() > MAX_EXPR_LEN {
                text.chars().take(MAX_EXPR_LEN).collect()
            } else {
                text
            }
        }
    }
}
