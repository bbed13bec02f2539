//! Front-end session state.
//!
//! A [`SessionState`] belongs to whatever renders the conversation. It holds
//! the display transcript and the thread id used for checkpoints. It is passed
//! by reference into the request handler; the pipeline never keeps it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::ThreadId;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

/// Body of a transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptContent {
    Text {
        text: String,
    },
    Diagnosis {
        #[serde(rename = "searchResult")]
        search_result: String,
        #[serde(rename = "finalAnswer")]
        final_answer: String,
    },
    Error {
        message: String,
    },
}

impl TranscriptContent {
    /// Markdown used when replaying the transcript.
    pub fn to_markdown(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Diagnosis {
                search_result,
                final_answer,
            } => format!(
                "🌐 **Web Search Results:**\n{}\n\n🔧 **Professional Diagnosis:**\n{}",
                search_result, final_answer
            ),
            Self::Error { message } => format!("❌ {}", message),
        }
    }
}

/// One exchange in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: TranscriptRole,
    pub content: TranscriptContent,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(role: TranscriptRole, content: TranscriptContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TranscriptRole::User, TranscriptContent::Text { text: text.into() })
    }

    pub fn diagnosis(search_result: impl Into<String>, final_answer: impl Into<String>) -> Self {
        Self::new(
            TranscriptRole::Assistant,
            TranscriptContent::Diagnosis {
                search_result: search_result.into(),
                final_answer: final_answer.into(),
            },
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            TranscriptRole::Assistant,
            TranscriptContent::Error {
                message: message.into(),
            },
        )
    }
}

/// Conversation owned by the front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "threadId")]
    thread_id: ThreadId,
    transcript: Vec<TranscriptEntry>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Start a conversation on a fresh random thread id.
    pub fn new() -> Self {
        Self::with_thread(Uuid::new_v4().to_string())
    }

    /// Start a conversation on a known thread id.
    pub fn with_thread(thread_id: impl Into<ThreadId>) -> Self {
        Self {
            thread_id: thread_id.into(),
            transcript: Vec::new(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Append an entry. The transcript is never edited in place.
    pub fn push(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry);
    }

    /// Drop the transcript and move to a new thread id.
    pub fn new_chat(&mut self) {
        self.transcript.clear();
        self.thread_id = Uuid::new_v4().to_string();
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chat_resets_thread_and_transcript() {
        let mut session = SessionState::new();
        let first = session.thread_id().to_string();
        session.push(TranscriptEntry::user("ABS light on"));
        session.push(TranscriptEntry::diagnosis("Wheel speed sensor", "Check sensor gap"));
        assert_eq!(session.len(), 2);

        session.new_chat();
        assert!(session.is_empty());
        assert_ne!(session.thread_id(), first);
    }

    #[test]
    fn test_transcript_serialization() {
        let entry = TranscriptEntry::diagnosis("s", "a");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"]["kind"], "diagnosis");
        assert_eq!(json["content"]["searchResult"], "s");
        assert_eq!(json["content"]["finalAnswer"], "a");
    }

    #[test]
    fn test_markdown_sections() {
        let md = TranscriptContent::Diagnosis {
            search_result: "Loose belt".into(),
            final_answer: "Tighten belt".into(),
        }
        .to_markdown();
        assert!(md.contains("**Web Search Results:**\nLoose belt"));
        assert!(md.contains("**Professional Diagnosis:**\nTighten belt"));
    }
}
