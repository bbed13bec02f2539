//! Request handler.
//!
//! The only place where errors become data. Everything upstream propagates
//! failures; here they are turned into an `{"error": ...}` response.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DiagError, DiagResult};
use crate::pipeline::DiagnosticPipeline;
use crate::session::{SessionState, TranscriptEntry};
use crate::state::DEFAULT_THREAD_ID;

/// Incoming diagnostic request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl DiagnosticRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Result of one request. Serializes to either
/// `{"searchResult", "finalAnswer"}` or `{"error"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DiagnosticResponse {
    Success {
        #[serde(rename = "searchResult")]
        search_result: String,
        #[serde(rename = "finalAnswer")]
        final_answer: String,
    },
    Failure {
        error: String,
    },
}

impl DiagnosticResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            error: message.into(),
        }
    }

    /// Failure response for `err`, worded as the handler reports it.
    pub fn from_error(err: &DiagError) -> Self {
        match err {
            DiagError::EmptyQuestion => Self::failure(err.to_string()),
            other => Self::failure(format!("Processing failed: {}", other)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }
}

/// Validates requests and runs them through the pipeline.
pub struct RequestHandler {
    pipeline: Arc<DiagnosticPipeline>,
}

impl RequestHandler {
    pub fn new(pipeline: Arc<DiagnosticPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<DiagnosticPipeline> {
        &self.pipeline
    }

    /// Answer one request. Never returns an error; failures are in the response.
    pub async fn handle(&self, request: DiagnosticRequest) -> DiagnosticResponse {
        if request.question.trim().is_empty() {
            warn!("Rejected request without a question");
            return DiagnosticResponse::from_error(&DiagError::EmptyQuestion);
        }

        let thread_id = request.thread_id.as_deref().unwrap_or(DEFAULT_THREAD_ID);
        info!(thread_id = thread_id, "Handling diagnostic request");

        match self.pipeline.run(&request.question, Some(thread_id)).await {
            Ok((search_result, final_answer)) => DiagnosticResponse::Success {
                search_result,
                final_answer,
            },
            Err(e) => {
                warn!(thread_id = thread_id, error = %e, "Diagnostic request failed");
                DiagnosticResponse::from_error(&e)
            }
        }
    }

    /// JSON in, JSON out.
    pub async fn handle_json(&self, body: &str) -> DiagResult<String> {
        let response = match serde_json::from_str::<DiagnosticRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Malformed request body");
                DiagnosticResponse::failure(format!("Invalid request: {}", e))
            }
        };
        Ok(serde_json::to_string(&response)?)
    }

    /// Answer `question` on the session's thread and record both sides of the
    /// exchange in its transcript.
    pub async fn handle_in_session(
        &self,
        session: &mut SessionState,
        question: &str,
    ) -> DiagnosticResponse {
        session.push(TranscriptEntry::user(question));

        let request = DiagnosticRequest::new(question).with_thread(session.thread_id());
        let response = self.handle(request).await;

        let entry = match &response {
            DiagnosticResponse::Success {
                search_result,
                final_answer,
            } => TranscriptEntry::diagnosis(search_result.clone(), final_answer.clone()),
            DiagnosticResponse::Failure { error } => TranscriptEntry::error(error.clone()),
        };
        session.push(entry);
        response
    }
}
