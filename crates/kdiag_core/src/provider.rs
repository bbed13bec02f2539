//! Contracts for the external model providers.
//!
//! The core never talks HTTP itself. Concrete adapters live in `kdiag_llm`;
//! tests plug in stubs or mocks.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::DiagResult;

/// Ordered, finite sequence of text fragments from one streaming call.
///
/// Single consumer. Once drained it cannot be replayed.
pub type FragmentStream = Pin<Box<dyn Stream<Item = DiagResult<String>> + Send>>;

/// Role of a message sent to a provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a provider request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Request to the search-augmented model.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A language model that performs live web lookups while answering.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Send one completion request and return the text of the first choice.
    async fn search(&self, request: SearchRequest) -> DiagResult<String>;
}

/// A general-purpose language model taking a single prompt string.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Single-shot call returning the complete answer.
    async fn invoke(&self, prompt: &str) -> DiagResult<String>;

    /// Streaming call. Fragments arrive in order and end when the model
    /// signals completion.
    async fn stream(&self, prompt: &str) -> DiagResult<FragmentStream>;
}
