//! # kdiag_core
//!
//! Diagnostic pipeline core for KDijagnostika.
//!
//! A free-text question is first expanded by a web-search-augmented model,
//! then reformatted by a general-purpose model into a structured,
//! technician-facing diagnosis.
//!
//! # Architecture
//!
//! - **Prompts**: static templates for the search and format requests
//! - **Stages**: [`SearchStage`] and [`FormatStage`], one provider call each
//! - **Pipeline**: [`DiagnosticPipeline`] sequences the stages and writes checkpoints
//! - **Store**: [`ThreadStore`] keeps per-thread checkpoint history in memory
//! - **Handler**: [`RequestHandler`] validates input and turns failures into responses
//! - **Session**: [`SessionState`] holds the front-end transcript and thread id
//!
//! Providers are abstracted behind [`SearchProvider`] and [`ChatModel`];
//! HTTP adapters live in `kdiag_llm`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kdiag_core::{
//!     DiagnosticPipeline, DiagnosticRequest, FormatStage, InMemoryThreadStore,
//!     RequestHandler, SearchStage,
//! };
//!
//! let pipeline = DiagnosticPipeline::new(
//!     SearchStage::new(search_provider),
//!     FormatStage::new(chat_model),
//! )
//! .with_store(Arc::new(InMemoryThreadStore::new()));
//!
//! let handler = RequestHandler::new(Arc::new(pipeline));
//! let response = handler
//!     .handle(DiagnosticRequest::new("Car won't start, clicking noise"))
//!     .await;
//! ```

pub mod error;
pub mod handler;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod session;
pub mod stage;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use error::{DiagError, DiagResult};
pub use handler::{DiagnosticRequest, DiagnosticResponse, RequestHandler};
pub use pipeline::{DiagnosticPipeline, FormatMode, PipelineEvent, PipelineOptions};
pub use provider::{ChatMessage, ChatModel, FragmentStream, MessageRole, SearchProvider, SearchRequest};
pub use session::{SessionState, TranscriptContent, TranscriptEntry, TranscriptRole};
pub use stage::{FormatStage, SearchStage, Stage, DEFAULT_SEARCH_MAX_TOKENS};
pub use state::{PipelineStage, PipelineState, ThreadId, DEFAULT_THREAD_ID};
pub use store::{Checkpoint, InMemoryThreadStore, ThreadStore};
