//! Pipeline stages.
//!
//! A stage is one unit of work that issues exactly one logical request to a
//! model provider and writes its output into the [`PipelineState`].
//!
//! Stages never catch provider errors. A failure propagates to whoever is
//! driving the pipeline, with no retry and no partial result.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::DiagResult;
use crate::prompts;
use crate::provider::{ChatMessage, ChatModel, FragmentStream, SearchProvider, SearchRequest};
use crate::state::{PipelineStage, PipelineState};

/// Default output budget for the search model.
pub const DEFAULT_SEARCH_MAX_TOKENS: u32 = 1500;

/// One step of the diagnostic pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Node name reported on pipeline events.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// The stage a state reaches once this step has run.
    fn target(&self) -> PipelineStage;

    /// Run the step, filling in this stage's field of `state`.
    async fn execute(&self, state: &mut PipelineState) -> DiagResult<()>;
}

/// Expands the question through a search-augmented model.
pub struct SearchStage {
    provider: Arc<dyn SearchProvider>,
    temperature: f32,
    max_tokens: u32,
}

impl SearchStage {
    /// Create a search stage pinned to temperature 0 and the default token budget.
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider,
            temperature: 0.0,
            max_tokens: DEFAULT_SEARCH_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Build the provider request for `question`.
    pub fn request(&self, question: &str) -> SearchRequest {
        SearchRequest {
            messages: vec![ChatMessage::user(prompts::search_prompt(question))],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Issue the search request and return the raw response text.
    pub async fn search(&self, question: &str) -> DiagResult<String> {
        debug!(max_tokens = self.max_tokens, "Sending search request");
        let result = self.provider.search(self.request(question)).await?;
        info!(bytes = result.len(), "Search stage completed");
        Ok(result)
    }
}

#[async_trait]
impl Stage for SearchStage {
    fn name(&self) -> &str {
        "sonar_search"
    }

    fn description(&self) -> &str {
        "Search the web for diagnostic information about the question"
    }

    fn target(&self) -> PipelineStage {
        PipelineStage::Searched
    }

    async fn execute(&self, state: &mut PipelineState) -> DiagResult<()> {
        state.search_result = self.search(&state.question).await?;
        Ok(())
    }
}

/// Reformats search output into a technician-facing diagnosis.
pub struct FormatStage {
    model: Arc<dyn ChatModel>,
}

impl FormatStage {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// The template-filled prompt used by both invocation modes.
    pub fn prompt(&self, question: &str, search_result: &str) -> String {
        prompts::format_prompt(question, search_result)
    }

    /// Blocking mode: one call, complete answer.
    pub async fn format(&self, question: &str, search_result: &str) -> DiagResult<String> {
        let prompt = self.prompt(question, search_result);
        debug!(prompt_bytes = prompt.len(), "Sending format request");
        let answer = self.model.invoke(&prompt).await?;
        info!(bytes = answer.len(), "Format stage completed");
        Ok(answer)
    }

    /// Streaming mode: fragments are handed to the caller as they arrive.
    ///
    /// The caller concatenates them. The returned stream cannot be restarted.
    pub async fn stream(&self, question: &str, search_result: &str) -> DiagResult<FragmentStream> {
        let prompt = self.prompt(question, search_result);
        debug!(prompt_bytes = prompt.len(), "Opening format stream");
        self.model.stream(&prompt).await
    }
}

#[async_trait]
impl Stage for FormatStage {
    fn name(&self) -> &str {
        "gpt_processing"
    }

    fn description(&self) -> &str {
        "Format search results into a structured diagnosis"
    }

    fn target(&self) -> PipelineStage {
        PipelineStage::Formatted
    }

    async fn execute(&self, state: &mut PipelineState) -> DiagResult<()> {
        state.final_answer = self.format(&state.question, &state.search_result).await?;
        Ok(())
    }
}
