//! Error types for the diagnostic core.

use thiserror::Error;

/// Result type alias for core operations.
pub type DiagResult<T> = Result<T, DiagError>;

/// Errors that can occur while answering a diagnostic question.
///
/// Stages never catch these. Only the request handler turns them into
/// a structured response.
#[derive(Error, Debug)]
pub enum DiagError {
    /// The question was missing or blank.
    #[error("No question provided")]
    EmptyQuestion,

    /// Any failure reported by a model provider. The provider's own
    /// message is kept verbatim.
    #[error("{0}")]
    Upstream(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DiagError {
    /// Wrap a provider failure, keeping its message.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for DiagError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
