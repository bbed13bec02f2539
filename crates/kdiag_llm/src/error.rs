//! Error types for the provider adapters.

use thiserror::Error;

use kdiag_core::DiagError;

/// Result type alias for provider operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors raised while talking to a model provider.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The API key was not supplied. Reported on first use, not at startup.
    #[error("{provider} API key not configured. Set {env_var}")]
    NotConfigured {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LlmError> for DiagError {
    fn from(err: LlmError) -> Self {
        DiagError::upstream(err)
    }
}
