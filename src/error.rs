//! Error types and exit codes for codag-engine

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for codag-engine operations
#[derive(Error, Debug)]
pub enum CodagError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported language for extension: {extension}")]
    UnsupportedLanguage { extension: String },

    #[error("Failed to parse file: {message}")]
    ParseFailure { message: String },

    #[error("Invalid node id `{id}`: {reason}")]
    InvalidNodeId { id: String, reason: String },

    #[error("Malformed analyzer response: {message}")]
    MalformedResponse { message: String },

    #[error("Analysis session {captured} is stale (cache cleared, now at {current})")]
    StaleSession { captured: u64, current: u64 },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodagError {
    /// Convert error to the process exit code:
    /// - 1: File not found / IO error
    /// - 2: Unsupported language
    /// - 3: Parse failure
    /// - 4: Malformed analyzer output or node id
    /// - 5: Stale analysis session
    /// - 6: Configuration error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::FileNotFound { .. } => ExitCode::from(1),
            Self::UnsupportedLanguage { .. } => ExitCode::from(2),
            Self::ParseFailure { .. } => ExitCode::from(3),
            Self::InvalidNodeId { .. } => ExitCode::from(4),
            Self::MalformedResponse { .. } => ExitCode::from(4),
            Self::Serialization(_) => ExitCode::from(4),
            Self::StaleSession { .. } => ExitCode::from(5),
            Self::ConfigError { .. } => ExitCode::from(6),
            Self::Io(_) => ExitCode::from(1),
        }
    }
}

/// Result type alias for codag-engine operations
pub type Result<T> = std::result::Result<T, CodagError>;
