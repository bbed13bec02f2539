//! Pipeline state carried between the search and format stages.

use serde::{Deserialize, Serialize};

/// Opaque conversation identifier. Only ever used as a lookup key.
pub type ThreadId = String;

/// Thread id used when a caller does not supply one.
pub const DEFAULT_THREAD_ID: &str = "default";

/// Position of a run in the `Init -> Searched -> Formatted` chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    Searched,
    Formatted,
}

impl Default for PipelineStage {
    fn default() -> Self {
        Self::Init
    }
}

impl PipelineStage {
    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Searched),
            Self::Searched => Some(Self::Formatted),
            Self::Formatted => None,
        }
    }

    /// Name of the transition that lands in this stage.
    ///
    /// `Init` is not reached by a transition and has no node name.
    pub fn node_name(self) -> Option<&'static str> {
        match self {
            Self::Init => None,
            Self::Searched => Some("sonar_search"),
            Self::Formatted => Some("gpt_processing"),
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Formatted
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Searched => "searched",
            Self::Formatted => "formatted",
        };
        write!(f, "{}", s)
    }
}

/// Record shared by the two stages of one run.
///
/// Fields are only ever filled in, never cleared, while a run is in progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub question: String,
    pub search_result: String,
    pub final_answer: String,
}

impl PipelineState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            search_result: String::new(),
            final_answer: String::new(),
        }
    }

    /// Stage implied by which fields have been filled.
    pub fn stage(&self) -> PipelineStage {
        if !self.final_answer.is_empty() {
            PipelineStage::Formatted
        } else if !self.search_result.is_empty() {
            PipelineStage::Searched
        } else {
            PipelineStage::Init
        }
    }
}
