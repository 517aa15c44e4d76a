//! Signatures of externally meaningful code
//!
//! "External" here means LLM provider SDKs and MCP servers: importing a
//! client library, constructing a client, or invoking a completion / tool
//! registration API. These signatures decide which call sites count as
//! marker calls and which imports feed the structural content hash.

use once_cell::sync::Lazy;
use regex::Regex;

/// Client library imports and constructors
const CLIENT_PATTERNS: &[&str] = &[
    // OpenAI / Azure
    r"from\s+openai\s+import",
    r"import\s+openai",
    r"OpenAI\s*\(",
    r#"import\s+.*from\s+['"]openai['"]"#,
    r"AzureOpenAI",
    r"azure\.ai\.openai",
    // Anthropic
    r"from\s+anthropic\s+import",
    r"import\s+anthropic",
    r"Anthropic\s*\(",
    r#"import\s+.*from\s+['"]@anthropic-ai/sdk['"]"#,
    // Google
    r"import\s+google\.generativeai",
    r"from\s+google\s+import\s+genai",
    r"genai\.configure",
    r"genai\.Client",
    r"genai\.GenerativeModel",
    r#"from\s+['"]@google/generative-ai['"]"#,
    r"GoogleGenerativeAI",
    r"google\.cloud\.aiplatform",
    r"from\s+vertexai",
    r"import\s+vertexai",
    // Self-hosted and smaller providers
    r"from\s+ollama\s+import",
    r"import\s+ollama",
    r#"import\s+.*from\s+['"]ollama['"]"#,
    r"import\s+cohere",
    r"cohere\.Client",
    r#"from\s+['"]cohere-ai['"]"#,
    r"from\s+huggingface_hub\s+import",
    r"InferenceClient",
    r#"from\s+['"]@huggingface/inference['"]"#,
    r"from\s+xai\s+import",
    r"import\s+xai",
    r"api\.x\.ai",
    r"from\s+mistralai\s+import",
    r"MistralClient",
    r"Mistral\s*\(",
    r"from\s+together\s+import",
    r"Together\s*\(",
    r"import\s+replicate",
    r"from\s+replicate\s+import",
    r"replicate\.run",
    r"from\s+fireworks\s+import",
    r"fireworks\.client",
    r"bedrock-runtime",
    r"InvokeModel",
    r"BedrockRuntimeClient",
    r"from\s+ai21\s+import",
    r"AI21Client",
    r"api\.deepseek\.com",
    r"openrouter\.ai",
    r"from\s+llama_cpp\s+import",
    r"import\s+llama_cpp",
    r"from\s+ctransformers\s+import",
    r"from\s+gguf\s+import",
    r"import\s+gguf",
    r"from\s+langchain.*import\s+LlamaCpp",
    r"node-llama-cpp",
    // MCP servers
    r#"import\s+.*from\s+['"]@modelcontextprotocol/sdk"#,
    r#"require\s*\(\s*['"]@modelcontextprotocol/sdk"#,
    r#"import\s+.*from\s+['"]fastmcp['"]"#,
    r#"require\s*\(\s*['"]fastmcp['"]"#,
    r"from\s+mcp\.server\s+import",
    r"from\s+mcp\.server\.",
    r"from\s+mcp\s+import",
    r"import\s+mcp\.server",
    r"import\s+mcp\b",
    r"from\s+fastmcp\s+import",
    r"import\s+fastmcp",
    r"McpServer\s*\(",
    r"MCPServer\s*\(",
    r"FastMCP\s*\(",
    r"github\.com/mark3labs/mcp-go",
    r"github\.com/modelcontextprotocol/go-sdk",
    r"use\s+rmcp\b",
    r"use\s+mcp_server\b",
    r"use\s+mcp_sdk\b",
    r#"#include\s+[<"]mcp_server\.h[>"]"#,
    r#"#include\s+[<"]mcp_tool\.h[>"]"#,
    r"mcp::server",
];

/// Completion, generation and tool-registration call shapes
const CALL_PATTERNS: &[&str] = &[
    r"\.chat\.completions\.create",
    r"\.completions\.create",
    r"\.messages\.create",
    r"\.generate_content",
    r"\.generateContent",
    r"\.chat\(",
    r"\.generate\(",
    r"\.create_completion\(",
    r"\.create_chat_completion\(",
    r"Llama\s*\(",
    r"GGUFReader\s*\(",
    r"AutoModelForCausalLM\.from_pretrained",
    r"McpServer\s*\(",
    r"MCPServer\s*\(",
    r"FastMCP\s*\(",
    r"\.tool\s*\(",
    r"\.resource\s*\(",
    r"\.prompt\s*\(",
    r"\.addTool\s*\(",
    r"\.addResource\s*\(",
    r"\.addPrompt\s*\(",
    r"\.AddTool\s*\(",
    r"\.AddResource\s*\(",
    r"\.AddPrompt\s*\(",
    r"NewMCPServer\s*\(",
    r"mcp\.NewTool\s*\(",
    r"mcp\.NewResource\s*\(",
    r"@\w+\.tool\b",
    r"@\w+\.resource\b",
    r"@\w+\.prompt\b",
    r"@\w+\.call_tool\b",
    r"@\w+\.list_tools\b",
    r"register_tool\s*\(",
    r"register_resource\s*\(",
    r"tool_builder\s*\(",
    r"\.serve\s*\(\s*transport",
    r"StdioServerTransport",
    r"[Ss]seServerTransport",
    r"server\.connect\s*\(",
];

/// Agent / orchestration frameworks, checked in order
const FRAMEWORK_PATTERNS: &[(&str, &[&str])] = &[
    (
        "langgraph",
        &[
            r"from\s+langgraph",
            r#"import\s+.*from\s+['"]@langchain/langgraph['"]"#,
            r"StateGraph|MessageGraph",
        ],
    ),
    (
        "mastra",
        &[r"from\s+mastra", r#"import\s+.*from\s+['"]mastra['"]"#, r"@mastra/"],
    ),
    (
        "langchain",
        &[
            r"from\s+langchain",
            r#"import\s+.*from\s+['"]@langchain"#,
            r"LLMChain|SequentialChain",
        ],
    ),
    (
        "crewai",
        &[r"from\s+crewai", r#"import\s+.*from\s+['"]crewai['"]"#, r"Crew\s*\("],
    ),
    (
        "llamaindex",
        &[
            r"from\s+llama_index",
            r#"import\s+.*from\s+['"]llamaindex['"]"#,
            r#"import\s+.*from\s+['"]@llama-index"#,
        ],
    ),
    ("autogen", &[r"from\s+autogen", r"from\s+pyautogen"]),
    ("haystack", &[r"from\s+haystack"]),
    ("semantickernel", &[r"from\s+semantic_kernel"]),
    ("pydanticai", &[r"from\s+pydantic_ai"]),
    ("instructor", &[r"import\s+instructor", r"from\s+instructor\s+import"]),
];

/// Provider-specific client signatures, used to name the framework when no
/// orchestration framework is present
const PROVIDER_PATTERNS: &[(&str, &str)] = &[
    ("openai", r"from\s+openai\s+import|import\s+openai|OpenAI\s*\("),
    ("anthropic", r"from\s+anthropic\s+import|import\s+anthropic|Anthropic\s*\("),
    (
        "gemini",
        r"import\s+google\.generativeai|from\s+google\s+import\s+genai|genai\.Client|GoogleGenerativeAI",
    ),
    ("ollama", r"from\s+ollama\s+import|import\s+ollama"),
    (
        "llama-cpp",
        r"from\s+llama_cpp\s+import|import\s+llama_cpp|from\s+gguf\s+import|from\s+ctransformers\s+import",
    ),
    (
        "mcp",
        r"@modelcontextprotocol/sdk|from\s+mcp\.server|from\s+mcp\s+import|from\s+fastmcp\s+import|McpServer\s*\(|MCPServer\s*\(|FastMCP\s*\(|mcp-go|modelcontextprotocol/go-sdk|use\s+rmcp\b|mcp::server|mcp_server\.h",
    ),
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Skipping invalid signature pattern {:?}: {}", p, e);
                None
            }
        })
        .collect()
}

static CLIENT_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| compile(CLIENT_PATTERNS));
static CALL_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| compile(CALL_PATTERNS));
static FRAMEWORK_REGEXES: Lazy<Vec<(&'static str, Vec<Regex>)>> = Lazy::new(|| {
    FRAMEWORK_PATTERNS
        .iter()
        .map(|(name, patterns)| (*name, compile(patterns)))
        .collect()
});
static PROVIDER_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    PROVIDER_PATTERNS
        .iter()
        .filter_map(|(name, p)| Regex::new(p).ok().map(|re| (*name, re)))
        .collect()
});

/// Whether text (an import statement, initializer, or code fragment)
/// references an external client library
pub fn is_client_reference(text: &str) -> bool {
    CLIENT_REGEXES.iter().any(|re| re.is_match(text))
}

/// Whether a call expression's text matches a known external API call
///
/// Pass the callee text followed by `(`, e.g. `client.chat.completions.create(`.
pub fn is_external_call(text: &str) -> bool {
    CALL_REGEXES.iter().any(|re| re.is_match(text)) || is_constructor_call(text)
}

/// Client constructors (`OpenAI(`) are external calls too
fn is_constructor_call(text: &str) -> bool {
    text.ends_with('(') && is_client_reference(text)
}

fn uses_framework(code: &str) -> Option<&'static str> {
    FRAMEWORK_REGEXES
        .iter()
        .find(|(_, regexes)| regexes.iter().any(|re| re.is_match(code)))
        .map(|(name, _)| *name)
}

/// Whether a file contains an LLM workflow: a client plus a call, or any
/// orchestration framework
pub fn detect_workflow(code: &str) -> bool {
    let has_client = is_client_reference(code);
    let has_calls = CALL_REGEXES.iter().any(|re| re.is_match(code));
    (has_client && has_calls) || uses_framework(code).is_some()
}

/// Name the framework or provider a file uses
pub fn detect_framework(code: &str) -> Option<&'static str> {
    if let Some(framework) = uses_framework(code) {
        return Some(framework);
    }

    if let Some((name, _)) = PROVIDER_REGEXES.iter().find(|(_, re)| re.is_match(code)) {
        return Some(name);
    }

    if detect_workflow(code) {
        return Some("generic-llm");
    }

    None
}
