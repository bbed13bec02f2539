//! Per-thread checkpoint store.
//!
//! Checkpoints are written after every stage transition and kept in order
//! per thread. They are an audit trail: a new run on the same thread still
//! starts from an empty state.
//!
//! The in-memory store locks only for the duration of a single call.
//! Two runs on the same thread at the same time interleave their writes and
//! the last one wins. Callers that need ordering must serialize per thread.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{PipelineStage, PipelineState, ThreadId};

/// Snapshot of a pipeline state after one transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    /// Position in the thread's checkpoint history, starting at 0.
    pub step: usize,
    pub stage: PipelineStage,
    pub state: PipelineState,
    pub created_at: DateTime<Utc>,
}

/// Storage for per-thread checkpoints.
pub trait ThreadStore: Send + Sync {
    /// Latest state stored for `thread_id`.
    fn get(&self, thread_id: &str) -> Option<PipelineState>;

    /// Record `state` as the newest checkpoint of `thread_id`, labelled with
    /// the stage implied by its filled fields.
    fn put(&self, thread_id: &str, state: PipelineState) {
        self.put_checkpoint(thread_id, state.stage(), state);
    }

    /// Record `state` as the newest checkpoint of `thread_id`, written after
    /// the transition into `stage`.
    fn put_checkpoint(&self, thread_id: &str, stage: PipelineStage, state: PipelineState);

    /// Every checkpoint of `thread_id`, oldest first.
    fn history(&self, thread_id: &str) -> Vec<Checkpoint>;

    /// Drop all checkpoints of `thread_id`.
    fn clear(&self, thread_id: &str);
}

/// Process-memory store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryThreadStore {
    threads: RwLock<HashMap<ThreadId, Vec<Checkpoint>>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest checkpoint, including its metadata.
    pub fn latest(&self, thread_id: &str) -> Option<Checkpoint> {
        self.threads
            .read()
            .get(thread_id)
            .and_then(|checkpoints| checkpoints.last().cloned())
    }

    /// Ids of all threads with at least one checkpoint.
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }
}

impl ThreadStore for InMemoryThreadStore {
    fn get(&self, thread_id: &str) -> Option<PipelineState> {
        self.latest(thread_id).map(|checkpoint| checkpoint.state)
    }

    fn put_checkpoint(&self, thread_id: &str, stage: PipelineStage, state: PipelineState) {
        let mut threads = self.threads.write();
        let checkpoints = threads.entry(thread_id.to_string()).or_default();
        let checkpoint = Checkpoint {
            thread_id: thread_id.to_string(),
            step: checkpoints.len(),
            stage,
            state,
            created_at: Utc::now(),
        };
        debug!(
            thread_id = thread_id,
            step = checkpoint.step,
            stage = %checkpoint.stage,
            "Stored checkpoint"
        );
        checkpoints.push(checkpoint);
    }

    fn history(&self, thread_id: &str) -> Vec<Checkpoint> {
        self.threads
            .read()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    fn clear(&self, thread_id: &str) {
        debug!(thread_id = thread_id, "Clearing thread checkpoints");
        self.threads.write().remove(thread_id);
    }
}

impl std::fmt::Debug for InMemoryThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryThreadStore")
            .field("threads", &self.thread_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn searched(question: &str, search: &str) -> PipelineState {
        let mut state = PipelineState::new(question);
        state.search_result = search.to_string();
        state
    }

    #[test]
    fn test_get_returns_latest() {
        let store = InMemoryThreadStore::new();
        assert!(store.get("t1").is_none());

        store.put("t1", searched("Overheating", "Thermostat stuck"));
        let mut done = searched("Overheating", "Thermostat stuck");
        done.final_answer = "Replace thermostat".into();
        store.put("t1", done.clone());

        assert_eq!(store.get("t1"), Some(done));
        assert_eq!(store.latest("t1").unwrap().stage, PipelineStage::Formatted);
    }

    #[test]
    fn test_threads_are_isolated() {
        let store = InMemoryThreadStore::new();
        store.put("thread-a", searched("Squeal on braking", "Pad wear indicator"));

        assert!(store.get("thread-b").is_none());
        assert!(store.history("thread-b").is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_history_is_ordered() {
        let store = InMemoryThreadStore::new();
        store.put("t", PipelineState::new("q1"));
        store.put("t", searched("q1", "s1"));
        store.put("t", PipelineState::new("q2"));

        let history = store.history("t");
        let steps: Vec<usize> = history.iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(history[1].stage, PipelineStage::Searched);
        assert_eq!(history[2].state.question, "q2");
    }

    #[test]
    fn test_explicit_stage_kept_for_empty_outputs() {
        let store = InMemoryThreadStore::new();
        store.put_checkpoint("t", PipelineStage::Searched, PipelineState::new("q"));
        store.put_checkpoint("t", PipelineStage::Formatted, PipelineState::new("q"));

        let stages: Vec<PipelineStage> = store.history("t").iter().map(|c| c.stage).collect();
        assert_eq!(stages, vec![PipelineStage::Searched, PipelineStage::Formatted]);
    }

    #[test]
    fn test_clear_removes_thread() {
        let store = InMemoryThreadStore::new();
        store.put("t", PipelineState::new("q"));
        store.put("other", PipelineState::new("q"));
        store.clear("t");

        assert!(store.get("t").is_none());
        assert!(store.get("other").is_some());
    }
}
