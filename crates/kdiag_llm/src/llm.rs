//! LLM adapter for chat completions.
//!
//! Both providers speak the OpenAI-compatible `/chat/completions` protocol.
//! Perplexity serves the search-augmented `sonar` model; OpenAI serves the
//! general-purpose model used for formatting, with optional SSE streaming.
//!
//! There is no retry and no timeout: a failed call surfaces immediately and a
//! hung call hangs the request.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kdiag_core::{ChatMessage, ChatModel, DiagError, DiagResult, FragmentStream, SearchProvider, SearchRequest};

use crate::error::{LlmError, LlmResult};
use crate::settings::{
    ChatSettings, Credentials, SearchSettings, OPENAI_API_KEY_ENV, PERPLEXITY_API_KEY_ENV,
};
use crate::sse;

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Perplexity,
    OpenAI,
}

impl LlmProvider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Perplexity => "Perplexity",
            Self::OpenAI => "OpenAI",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Perplexity => PERPLEXITY_API_KEY_ENV,
            Self::OpenAI => OPENAI_API_KEY_ENV,
        }
    }
}

/// Sampling parameters for one completion call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompletionParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration.
    ///
    /// A missing key is accepted here and reported on the first call.
    pub fn new(
        provider: LlmProvider,
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            api_key,
            model: model.into(),
            base_url: base_url.into(),
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// Search adapter (Perplexity) from settings.
    pub fn for_search(settings: &SearchSettings, credentials: &Credentials) -> Self {
        Self::new(
            LlmProvider::Perplexity,
            credentials.perplexity_api_key.clone(),
            &settings.model,
            &settings.base_url,
        )
    }

    /// Chat adapter (OpenAI) from settings.
    pub fn for_chat(settings: &ChatSettings, credentials: &Credentials) -> Self {
        let mut adapter = Self::new(
            LlmProvider::OpenAI,
            credentials.openai_api_key.clone(),
            &settings.model,
            &settings.base_url,
        );
        adapter.temperature = settings.temperature;
        adapter
    }

    /// Default temperature used by [`ChatModel`] calls.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Get the current provider
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Get the current model
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Complete a conversation and return the text of the first choice.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        params: CompletionParams,
    ) -> LlmResult<String> {
        let request = self.build_request(messages, params, false);
        let response = self.send(&request).await?;

        let result: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                LlmError::MalformedResponse(format!(
                    "No response content from {}",
                    self.provider.display_name()
                ))
            })?;

        debug!(
            provider = self.provider.display_name(),
            bytes = content.len(),
            "Completion received"
        );
        Ok(content)
    }

    /// Complete a conversation as a stream of content fragments.
    pub async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        params: CompletionParams,
    ) -> LlmResult<FragmentStream> {
        let request = self.build_request(messages, params, true);
        let response = self.send(&request).await?;
        let provider = self.provider.display_name();

        let fragments = sse::data_lines(response.bytes_stream()).filter_map(move |line| async move {
            match line {
                Ok(data) => match serde_json::from_str::<StreamChunk>(&data) {
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .filter(|text| !text.is_empty())
                        .map(Ok::<String, DiagError>),
                    Err(e) => {
                        warn!(provider = provider, error = %e, "Skipping unparseable stream chunk");
                        None
                    }
                },
                Err(e) => Some(Err(DiagError::from(e))),
            }
        });

        Ok(Box::pin(fragments))
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: CompletionParams,
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &CompletionRequest<'_>) -> LlmResult<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::NotConfigured {
            provider: self.provider.display_name(),
            env_var: self.provider.api_key_env(),
        })?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(
            provider = self.provider.display_name(),
            model = %self.model,
            stream = request.stream,
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: self.provider.display_name(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl SearchProvider for LlmAdapter {
    async fn search(&self, request: SearchRequest) -> DiagResult<String> {
        let params = CompletionParams {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
        };
        Ok(self.complete(&request.messages, params).await?)
    }
}

#[async_trait]
impl ChatModel for LlmAdapter {
    async fn invoke(&self, prompt: &str) -> DiagResult<String> {
        let params = CompletionParams {
            temperature: self.temperature,
            max_tokens: None,
        };
        Ok(self.complete(&[ChatMessage::user(prompt)], params).await?)
    }

    async fn stream(&self, prompt: &str) -> DiagResult<FragmentStream> {
        let params = CompletionParams {
            temperature: self.temperature,
            max_tokens: None,
        };
        Ok(self
            .complete_stream(&[ChatMessage::user(prompt)], params)
            .await?)
    }
}

// Chat completions wire types
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
