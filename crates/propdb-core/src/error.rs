use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Why an embedding call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingFailure {
    Network,
    Timeout,
    RateLimited,
    Authentication,
    InvalidResponse,
    DimensionMismatch,
    Model,
}

impl fmt::Display for EmbeddingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate limited",
            Self::Authentication => "authentication",
            Self::InvalidResponse => "invalid response",
            Self::DimensionMismatch => "dimension mismatch",
            Self::Model => "model",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Embedding provider failed ({kind}): {message}")]
    EmbeddingProvider { kind: EmbeddingFailure, message: String },

    #[error("No source documents found under {}", .0.display())]
    EmptyCorpus(PathBuf),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn embedding(kind: EmbeddingFailure, msg: impl Into<String>) -> Self {
        Self::EmbeddingProvider { kind, message: msg.into() }
    }

    /// Wraps an I/O failure on store files, keeping the path in the message.
    pub fn io(context: &str, path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Persistence(format!("{context} {}: {err}", path.display()))
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    pub fn is_embedding(&self) -> bool {
        matches!(self, Self::EmbeddingProvider { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
