//! Structured node identifiers
//!
//! Node ids have the form `<relativeFilePath>::<functionName>[::<line>]`.
//! `::` never appears in a real filename, so the id splits unambiguously.
//! Ids are parsed once at the boundary; code past this point works with
//! the typed parts instead of re-splitting strings.

use std::fmt;
use std::str::FromStr;

use crate::error::{CodagError, Result};
use crate::paths::normalize_path;

/// Reserved separator between id segments
pub const ID_SEPARATOR: &str = "::";

/// A parsed `file::function[::line]` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    file: String,
    function: String,
    line: Option<u32>,
}

impl NodeId {
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }

    /// Parse an identifier, rejecting anything that is not a file reference
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| CodagError::InvalidNodeId {
            id: raw.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = raw.trim().split(ID_SEPARATOR).collect();
        let (file, function, line) = match parts.as_slice() {
            [file, function] => (*file, *function, None),
            [file, function, line] => {
                let line = line
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| invalid("line segment is not a number"))?;
                (*file, *function, Some(line))
            }
            [_] => return Err(invalid("missing `::` separator")),
            _ => return Err(invalid("too many segments")),
        };

        let file = file.trim();
        let function = function.trim();
        if file.is_empty() {
            return Err(invalid("empty file segment"));
        }
        if function.is_empty() {
            return Err(invalid("empty function segment"));
        }

        Ok(Self {
            file: file.to_string(),
            function: function.to_string(),
            line,
        })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    /// Whether the file segment looks like a real file (`name.ext`)
    pub fn has_file_extension(&self) -> bool {
        has_file_extension(&self.file)
    }

    /// Same id with the file segment normalized
    pub fn normalized(&self) -> Self {
        Self {
            file: normalize_path(&self.file),
            function: self.function.clone(),
            line: self.line,
        }
    }

    /// The function-level id (line dropped)
    pub fn without_line(&self) -> Self {
        Self {
            file: self.file.clone(),
            function: self.function.clone(),
            line: None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}::{}::{}", self.file, self.function, line),
            None => write!(f, "{}::{}", self.file, self.function),
        }
    }
}

impl FromStr for NodeId {
    type Err = CodagError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether the last path segment has a non-empty extension
pub fn has_file_extension(path: &str) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) => idx > 0 && idx + 1 < name.len(),
        None => false,
    }
}

/// Turn an identifier into a display label
///
/// `loadConfig` -> `Load Config`, `call_llm` -> `Call Llm`,
/// `OpenAI-API` -> `Open AI API`.
pub fn humanize(identifier: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = identifier.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1).copied();
        let boundary = match prev {
            Some(p) if c.is_uppercase() => {
                p.is_lowercase()
                    || p.is_ascii_digit()
                    || (p.is_uppercase() && next.map(|n| n.is_lowercase()).unwrap_or(false))
            }
            _ => false,
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .into_iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Clean a bare symbolic endpoint (e.g. an external service name) into a label
pub fn clean_symbol(symbol: &str) -> String {
    let trimmed = symbol
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`');
    let last = trimmed.rsplit(ID_SEPARATOR).next().unwrap_or(trimmed);
    let label = humanize(last);
    if label.is_empty() {
        trimmed.to_string()
    } else {
        label
    }
}
