//! Per-language AST node tables for call graph extraction
//!
//! Each family maps the concepts the extractor cares about (function
//! definitions, call sites, imports, variable initializers) to tree-sitter
//! node kinds and field names. The extractor itself is generic over these
//! tables.

use crate::lang::LangFamily;

/// AST node mappings for call graph extraction
#[derive(Debug, Clone)]
pub struct CallGrammar {
    pub name: &'static str,

    // =========================================================================
    // Definitions
    // =========================================================================
    /// Named function/method declarations
    pub function_nodes: &'static [&'static str],

    /// Anonymous function expressions, named after the binding they are
    /// assigned to (`const f = () => ...`)
    pub lambda_nodes: &'static [&'static str],

    /// Field holding the function name
    pub name_field: &'static str,

    /// Field holding the parameter list
    pub params_field: &'static str,

    /// Parameter node kinds whose name should be recorded
    pub param_nodes: &'static [&'static str],

    // =========================================================================
    // Calls
    // =========================================================================
    /// Call expression nodes
    pub call_nodes: &'static [&'static str],

    /// Field holding the callee expression; empty when the call node
    /// carries `object` + `name` fields directly (Java)
    pub callee_field: &'static str,

    /// Constructor invocation nodes (`new Foo()`)
    pub constructor_nodes: &'static [&'static str],

    /// Field holding the constructed type
    pub constructor_field: &'static str,

    // =========================================================================
    // Imports / bindings
    // =========================================================================
    pub import_nodes: &'static [&'static str],

    /// Declarations binding a name to an initializer
    pub binding_nodes: &'static [&'static str],

    /// Field holding the bound name (or pattern)
    pub binding_name_field: &'static str,

    /// Field holding the initializer
    pub binding_value_field: &'static str,

    // =========================================================================
    // Member access
    // =========================================================================
    /// `(node kind, object field, property field)` for member-access chains
    pub member_nodes: &'static [(&'static str, &'static str, &'static str)],

    /// Token marking an async function, checked among direct children
    pub async_token: Option<&'static str>,
}

pub static JAVASCRIPT_GRAMMAR: CallGrammar = CallGrammar {
    name: "javascript",
    function_nodes: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    lambda_nodes: &["arrow_function", "function_expression"],
    name_field: "name",
    params_field: "parameters",
    param_nodes: &[
        "identifier",
        "required_parameter",
        "optional_parameter",
        "assignment_pattern",
        "rest_pattern",
    ],
    call_nodes: &["call_expression"],
    callee_field: "function",
    constructor_nodes: &["new_expression"],
    constructor_field: "constructor",
    import_nodes: &["import_statement"],
    binding_nodes: &["variable_declarator"],
    binding_name_field: "name",
    binding_value_field: "value",
    member_nodes: &[("member_expression", "object", "property")],
    async_token: Some("async"),
};

pub static PYTHON_GRAMMAR: CallGrammar = CallGrammar {
    name: "python",
    function_nodes: &["function_definition"],
    lambda_nodes: &[],
    name_field: "name",
    params_field: "parameters",
    param_nodes: &[
        "identifier",
        "typed_parameter",
        "default_parameter",
        "typed_default_parameter",
        "list_splat_pattern",
        "dictionary_splat_pattern",
    ],
    call_nodes: &["call"],
    callee_field: "function",
    constructor_nodes: &[],
    constructor_field: "",
    import_nodes: &["import_statement", "import_from_statement"],
    binding_nodes: &["assignment"],
    binding_name_field: "left",
    binding_value_field: "right",
    member_nodes: &[("attribute", "object", "attribute")],
    async_token: Some("async"),
};

pub static RUST_GRAMMAR: CallGrammar = CallGrammar {
    name: "rust",
    function_nodes: &["function_item"],
    lambda_nodes: &[],
    name_field: "name",
    params_field: "parameters",
    param_nodes: &["parameter", "self_parameter"],
    call_nodes: &["call_expression"],
    callee_field: "function",
    constructor_nodes: &[],
    constructor_field: "",
    import_nodes: &["use_declaration"],
    binding_nodes: &["let_declaration"],
    binding_name_field: "pattern",
    binding_value_field: "value",
    member_nodes: &[
        ("field_expression", "value", "field"),
        ("scoped_identifier", "path", "name"),
    ],
    async_token: Some("async"),
};

pub static GO_GRAMMAR: CallGrammar = CallGrammar {
    name: "go",
    function_nodes: &["function_declaration", "method_declaration"],
    lambda_nodes: &[],
    name_field: "name",
    params_field: "parameters",
    param_nodes: &["parameter_declaration", "variadic_parameter_declaration"],
    call_nodes: &["call_expression"],
    callee_field: "function",
    constructor_nodes: &[],
    constructor_field: "",
    import_nodes: &["import_spec"],
    binding_nodes: &["short_var_declaration", "var_spec"],
    binding_name_field: "left",
    binding_value_field: "right",
    member_nodes: &[("selector_expression", "operand", "field")],
    async_token: None,
};

pub static JAVA_GRAMMAR: CallGrammar = CallGrammar {
    name: "java",
    function_nodes: &["method_declaration", "constructor_declaration"],
    lambda_nodes: &[],
    name_field: "name",
    params_field: "parameters",
    param_nodes: &["formal_parameter", "spread_parameter"],
    call_nodes: &["method_invocation"],
    callee_field: "",
    constructor_nodes: &["object_creation_expression"],
    constructor_field: "type",
    import_nodes: &["import_declaration"],
    binding_nodes: &["variable_declarator"],
    binding_name_field: "name",
    binding_value_field: "value",
    member_nodes: &[("field_access", "object", "field")],
    async_token: None,
};

/// Grammar table for a language family
pub fn grammar_for(family: LangFamily) -> &'static CallGrammar {
    match family {
        LangFamily::JavaScript => &JAVASCRIPT_GRAMMAR,
        LangFamily::Python => &PYTHON_GRAMMAR,
        LangFamily::Rust => &RUST_GRAMMAR,
        LangFamily::Go => &GO_GRAMMAR,
        LangFamily::Java => &JAVA_GRAMMAR,
    }
}

impl CallGrammar {
    pub fn is_function(&self, kind: &str) -> bool {
        self.function_nodes.contains(&kind)
    }

    pub fn is_lambda(&self, kind: &str) -> bool {
        self.lambda_nodes.contains(&kind)
    }

    pub fn is_call(&self, kind: &str) -> bool {
        self.call_nodes.contains(&kind)
    }

    pub fn is_constructor(&self, kind: &str) -> bool {
        self.constructor_nodes.contains(&kind)
    }

    pub fn is_import(&self, kind: &str) -> bool {
        self.import_nodes.contains(&kind)
    }

    pub fn is_binding(&self, kind: &str) -> bool {
        self.binding_nodes.contains(&kind)
    }

    /// Object/property fields for a member-access node kind
    pub fn member_fields(&self, kind: &str) -> Option<(&'static str, &'static str)> {
        self.member_nodes
            .iter()
            .find(|(k, _, _)| *k == kind)
            .map(|(_, object, property)| (*object, *property))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_family_has_a_grammar() {
        for (family, name) in [
            (LangFamily::JavaScript, "javascript"),
            (LangFamily::Python, "python"),
            (LangFamily::Rust, "rust"),
            (LangFamily::Go, "go"),
            (LangFamily::Java, "java"),
        ] {
            let grammar = grammar_for(family);
            assert_eq!(grammar.name, name);
            assert!(!grammar.function_nodes.is_empty());
            assert!(!grammar.call_nodes.is_empty());
        }
    }

    #[test]
    fn test_member_fields() {
        assert_eq!(
            JAVASCRIPT_GRAMMAR.member_fields("member_expression"),
            Some(("object", "property"))
        );
        assert_eq!(
            RUST_GRAMMAR.member_fields("scoped_identifier"),
            Some(("path", "name"))
        );
        assert!(PYTHON_GRAMMAR.member_fields("member_expression").is_none());
    }
}
