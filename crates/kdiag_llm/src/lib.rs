//! # kdiag_llm
//!
//! HTTP adapters for the two model providers used by the diagnostic pipeline:
//!
//! - **Search**: Perplexity `sonar`, a search-augmented model
//! - **Chat**: OpenAI chat completions, blocking or streamed over SSE
//!
//! Settings come from defaults, `.kdiag/settings.json` and `KDIAG_*`
//! environment variables. API keys come from `PERPLEXITY_API_KEY` and
//! `OPENAI_API_KEY` and are only checked when a call needs them.

pub mod error;
pub mod llm;
pub mod settings;
pub mod sse;

pub use error::{LlmError, LlmResult};
pub use llm::{CompletionParams, LlmAdapter, LlmProvider};
pub use settings::{ChatSettings, Credentials, ProviderSettings, SearchSettings};

use std::sync::Arc;

use kdiag_core::{DiagnosticPipeline, FormatStage, SearchStage};

/// Build a pipeline wired to the configured providers.
///
/// Store and options are left at their defaults for the caller to set.
pub fn build_pipeline(settings: &ProviderSettings, credentials: &Credentials) -> DiagnosticPipeline {
    let search = SearchStage::new(Arc::new(LlmAdapter::for_search(&settings.search, credentials)))
        .with_max_tokens(settings.search.max_tokens);
    let format = FormatStage::new(Arc::new(LlmAdapter::for_chat(&settings.chat, credentials)));
    DiagnosticPipeline::new(search, format)
}
