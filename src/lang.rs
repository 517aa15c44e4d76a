//! Source languages the call graph extractor can parse
//!
//! Detection is by extension only. Files in any other language still get
//! cached and merged; they just fall back to the raw content hash and
//! cannot be patched locally.

use std::path::Path;
use tree_sitter::Language;

use crate::error::{CodagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Rust,
    Python,
    Go,
    Java,
}

/// Extension table, lowercase
const EXTENSIONS: &[(&str, Lang)] = &[
    ("ts", Lang::TypeScript),
    ("mts", Lang::TypeScript),
    ("cts", Lang::TypeScript),
    ("tsx", Lang::Tsx),
    ("js", Lang::JavaScript),
    ("mjs", Lang::JavaScript),
    ("cjs", Lang::JavaScript),
    ("jsx", Lang::Jsx),
    ("rs", Lang::Rust),
    ("py", Lang::Python),
    ("pyi", Lang::Python),
    ("go", Lang::Go),
    ("java", Lang::Java),
];

impl Lang {
    /// Language of a cache key such as `backend/client.py`
    pub fn from_key(key: &str) -> Result<Self> {
        Self::from_path(Path::new(key))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => Err(CodagError::UnsupportedLanguage {
                extension: "none".to_string(),
            }),
        }
    }

    pub fn from_extension(ext: &str) -> Result<Self> {
        let ext = ext.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, lang)| *lang)
            .ok_or(CodagError::UnsupportedLanguage { extension: ext })
    }

    /// Name reported in extracted call graphs
    pub fn name(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Jsx => "jsx",
            Self::Rust => "rust",
            Self::Python => "python",
            Self::Go => "go",
            Self::Java => "java",
        }
    }

    pub fn tree_sitter_language(&self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            // JSX parses with the plain JavaScript grammar
            Self::JavaScript | Self::Jsx => tree_sitter_javascript::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }

    /// Grammar table the extractor walks this language with
    pub fn family(&self) -> LangFamily {
        match self {
            Self::TypeScript | Self::Tsx | Self::JavaScript | Self::Jsx => LangFamily::JavaScript,
            Self::Rust => LangFamily::Rust,
            Self::Python => LangFamily::Python,
            Self::Go => LangFamily::Go,
            Self::Java => LangFamily::Java,
        }
    }
}

/// Languages sharing one call grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LangFamily {
    /// JavaScript, TypeScript and their JSX variants
    JavaScript,
    Rust,
    Python,
    Go,
    Java,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_table() {
        assert_eq!(Lang::from_extension("ts").unwrap(), Lang::TypeScript);
        assert_eq!(Lang::from_extension("TSX").unwrap(), Lang::Tsx);
        assert_eq!(Lang::from_extension("cjs").unwrap(), Lang::JavaScript);
        assert_eq!(Lang::from_extension("pyi").unwrap(), Lang::Python);
        assert_eq!(Lang::from_extension("go").unwrap(), Lang::Go);
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(Lang::from_key("src/components/App.jsx").unwrap().family(), LangFamily::JavaScript);
        assert_eq!(Lang::from_key("backend/client.py").unwrap().name(), "python");
        assert!(matches!(
            Lang::from_key("README"),
            Err(CodagError::UnsupportedLanguage { extension }) if extension == "none"
        ));
        assert!(Lang::from_key("notes.md").is_err());
    }
}
