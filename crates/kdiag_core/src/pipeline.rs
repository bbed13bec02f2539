//! Pipeline orchestrator.
//!
//! Drives one question through `Init -> Searched -> Formatted`. Transitions
//! are never skipped or reordered, and the format stage only starts once the
//! full search result is available. A stage failure aborts the run; there is
//! no recovery transition.
//!
//! # Modes
//!
//! - [`DiagnosticPipeline::run`] executes both transitions and returns both outputs.
//! - [`DiagnosticPipeline::stream`] yields one [`PipelineEvent`] per transition.
//!   With [`FormatMode::Streaming`] the format event carries no output; the
//!   caller pulls fragments with [`DiagnosticPipeline::stream_answer`] and hands
//!   the concatenated answer back through [`DiagnosticPipeline::complete_streamed`].
//!
//! # Checkpoints
//!
//! When a thread id is given and checkpointing is enabled, the state is
//! written to the [`ThreadStore`] after each transition. Checkpoints are
//! history only. Every run starts from a fresh state.

use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::DiagResult;
use crate::provider::FragmentStream;
use crate::stage::{FormatStage, SearchStage, Stage};
use crate::state::{PipelineStage, PipelineState};
use crate::store::ThreadStore;

/// How the format stage is invoked while streaming pipeline events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatMode {
    /// One call, answer carried on the format event.
    Blocking,
    /// The caller streams the answer itself after the format event.
    Streaming,
}

impl Default for FormatMode {
    fn default() -> Self {
        Self::Blocking
    }
}

/// Options selecting the pipeline variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineOptions {
    pub format_mode: FormatMode,
    pub checkpointing: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            format_mode: FormatMode::Blocking,
            checkpointing: true,
        }
    }
}

/// Emitted after each completed transition.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEvent {
    /// Stage reached by the transition.
    pub stage: PipelineStage,
    /// Output written by the transition. `None` for a deferred format step.
    pub output: Option<String>,
    /// State snapshot after the transition.
    pub state: PipelineState,
}

impl PipelineEvent {
    /// Node name of the transition (`sonar_search` or `gpt_processing`).
    pub fn node_name(&self) -> &'static str {
        self.stage.node_name().unwrap_or("init")
    }

    /// True when the caller is expected to stream the answer itself.
    pub fn is_deferred(&self) -> bool {
        self.output.is_none()
    }
}

/// The two-stage diagnostic pipeline.
pub struct DiagnosticPipeline {
    search: SearchStage,
    format: FormatStage,
    store: Option<Arc<dyn ThreadStore>>,
    options: PipelineOptions,
}

impl DiagnosticPipeline {
    pub fn new(search: SearchStage, format: FormatStage) -> Self {
        Self {
            search,
            format,
            store: None,
            options: PipelineOptions::default(),
        }
    }

    /// Attach a checkpoint store.
    pub fn with_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_format_mode(mut self, mode: FormatMode) -> Self {
        self.options.format_mode = mode;
        self
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    pub fn store(&self) -> Option<&Arc<dyn ThreadStore>> {
        self.store.as_ref()
    }

    pub fn search_stage(&self) -> &SearchStage {
        &self.search
    }

    pub fn format_stage(&self) -> &FormatStage {
        &self.format
    }

    /// Run both transitions and return `(search_result, final_answer)`.
    ///
    /// The format stage is always invoked in blocking mode here.
    pub async fn run(&self, question: &str, thread_id: Option<&str>) -> DiagResult<(String, String)> {
        let state = self.execute(question, thread_id).await?;
        Ok((state.search_result, state.final_answer))
    }

    /// Run both transitions and return the final state.
    pub async fn execute(&self, question: &str, thread_id: Option<&str>) -> DiagResult<PipelineState> {
        info!(thread_id = thread_id.unwrap_or("-"), "Starting diagnostic run");

        let mut state = PipelineState::new(question);
        for stage in self.stages() {
            self.transition(stage, &mut state, thread_id, FormatMode::Blocking)
                .await?;
        }

        info!(thread_id = thread_id.unwrap_or("-"), "Diagnostic run completed");
        Ok(state)
    }

    /// Lazily run the pipeline, yielding one event per transition.
    ///
    /// A failed transition yields its error and ends the stream.
    pub fn stream<'a>(
        &'a self,
        question: &str,
        thread_id: Option<&str>,
    ) -> impl Stream<Item = DiagResult<PipelineEvent>> + Send + 'a {
        let cursor = Cursor {
            state: PipelineState::new(question),
            next: 0,
            thread_id: thread_id.map(str::to_string),
            halted: false,
        };
        let mode = self.options.format_mode;

        info!(
            thread_id = thread_id.unwrap_or("-"),
            mode = ?mode,
            "Streaming diagnostic run"
        );

        futures::stream::unfold(cursor, move |mut cursor| async move {
            if cursor.halted {
                return None;
            }
            let stage = self.stages().get(cursor.next).copied()?;
            let result = self
                .transition(stage, &mut cursor.state, cursor.thread_id.as_deref(), mode)
                .await;
            match result {
                Ok(event) => {
                    cursor.next += 1;
                    Some((Ok(event), cursor))
                }
                Err(e) => {
                    cursor.halted = true;
                    Some((Err(e), cursor))
                }
            }
        })
    }

    /// Open the answer stream for a state that has reached `Searched`.
    ///
    /// Uses the same template-filled prompt as the blocking format call.
    pub async fn stream_answer(&self, state: &PipelineState) -> DiagResult<FragmentStream> {
        self.format
            .stream(&state.question, &state.search_result)
            .await
    }

    /// Record an answer the caller assembled from streamed fragments.
    ///
    /// Writes the final checkpoint for `thread_id`. An answer already set on
    /// `state` is kept.
    pub fn complete_streamed(
        &self,
        mut state: PipelineState,
        answer: String,
        thread_id: Option<&str>,
    ) -> PipelineState {
        if state.final_answer.is_empty() {
            state.final_answer = answer;
        }
        self.checkpoint(thread_id, PipelineStage::Formatted, &state);
        state
    }

    /// Stages in execution order.
    fn stages(&self) -> [&dyn Stage; 2] {
        [&self.search, &self.format]
    }

    async fn transition(
        &self,
        stage: &dyn Stage,
        state: &mut PipelineState,
        thread_id: Option<&str>,
        mode: FormatMode,
    ) -> DiagResult<PipelineEvent> {
        let target = stage.target();
        if target == PipelineStage::Formatted && mode == FormatMode::Streaming {
            debug!("Format transition deferred to caller stream");
            return Ok(PipelineEvent {
                stage: target,
                output: None,
                state: state.clone(),
            });
        }

        info!(stage = stage.name(), "Executing stage");
        if let Err(e) = stage.execute(state).await {
            error!(stage = stage.name(), error = %e, "Stage failed");
            return Err(e);
        }

        self.checkpoint(thread_id, target, state);

        let output = match target {
            PipelineStage::Searched => state.search_result.clone(),
            _ => state.final_answer.clone(),
        };
        Ok(PipelineEvent {
            stage: target,
            output: Some(output),
            state: state.clone(),
        })
    }

    fn checkpoint(&self, thread_id: Option<&str>, stage: PipelineStage, state: &PipelineState) {
        if !self.options.checkpointing {
            return;
        }
        if let (Some(store), Some(thread_id)) = (&self.store, thread_id) {
            store.put_checkpoint(thread_id, stage, state.clone());
        }
    }
}

struct Cursor {
    state: PipelineState,
    /// Index of the next stage to run.
    next: usize,
    thread_id: Option<String>,
    halted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagError;
    use crate::provider::{
        ChatModel, FragmentStream, MockChatModel, MockSearchProvider, SearchProvider, SearchRequest,
    };
    use crate::store::InMemoryThreadStore;
    use async_trait::async_trait;
    use futures::StreamExt;
    use parking_lot::Mutex;

    /// Records every provider call in order.
    #[derive(Clone, Default)]
    struct CallLog(Arc<Mutex<Vec<String>>>);

    impl CallLog {
        fn push(&self, entry: String) {
            self.0.lock().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    struct FixedSearch {
        log: CallLog,
        reply: String,
    }

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, request: SearchRequest) -> DiagResult<String> {
            self.log.push(format!("search:{}", request.messages[0].content));
            Ok(self.reply.clone())
        }
    }

    /// Deterministic model that answers with the prompt's last line of data.
    struct EchoModel {
        log: CallLog,
    }

    fn echo_answer(prompt: &str) -> String {
        let data = prompt
            .lines()
            .find_map(|l| l.strip_prefix("WEB SEARCH DATA: "))
            .unwrap_or("");
        format!("Diagnosis based on: {}", data)
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn invoke(&self, prompt: &str) -> DiagResult<String> {
            self.log.push(format!("format:{}", prompt));
            Ok(echo_answer(prompt))
        }

        async fn stream(&self, prompt: &str) -> DiagResult<FragmentStream> {
            self.log.push(format!("stream:{}", prompt));
            let answer = echo_answer(prompt);
            let fragments: Vec<DiagResult<String>> = answer
                .split_inclusive(' ')
                .map(|s| Ok(s.to_string()))
                .collect();
            Ok(Box::pin(futures::stream::iter(fragments)))
        }
    }

    fn echo_pipeline(log: &CallLog, reply: &str) -> DiagnosticPipeline {
        DiagnosticPipeline::new(
            SearchStage::new(Arc::new(FixedSearch {
                log: log.clone(),
                reply: reply.to_string(),
            })),
            FormatStage::new(Arc::new(EchoModel { log: log.clone() })),
        )
    }

    #[tokio::test]
    async fn test_run_calls_search_then_format_once() {
        let log = CallLog::default();
        let pipeline = echo_pipeline(&log, "Weak battery, corroded terminals");

        let (search, answer) = pipeline.run("Slow crank in the morning", None).await.unwrap();

        assert_eq!(search, "Weak battery, corroded terminals");
        assert_eq!(answer, "Diagnosis based on: Weak battery, corroded terminals");

        let calls = log.entries();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("search:"));
        assert!(calls[0].contains("Slow crank in the morning"));
        assert!(calls[1].starts_with("format:"));
        assert!(calls[1].contains("WEB SEARCH DATA: Weak battery, corroded terminals"));
    }

    #[tokio::test]
    async fn test_search_failure_skips_format() {
        let mut search = MockSearchProvider::new();
        search
            .expect_search()
            .times(1)
            .returning(|_| Err(DiagError::Upstream("401 invalid api key".into())));
        let mut model = MockChatModel::new();
        model.expect_invoke().times(0);

        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = DiagnosticPipeline::new(
            SearchStage::new(Arc::new(search)),
            FormatStage::new(Arc::new(model)),
        )
        .with_store(store.clone());

        let err = pipeline.run("Noise", Some("t1")).await.unwrap_err();
        assert_eq!(err.to_string(), "401 invalid api key");
        assert!(store.history("t1").is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_event_per_transition() {
        let log = CallLog::default();
        let pipeline = echo_pipeline(&log, "Low fuel pressure");

        let events: Vec<PipelineEvent> = pipeline
            .stream("Stalls at idle", None)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].node_name(), "sonar_search");
        assert_eq!(events[0].output.as_deref(), Some("Low fuel pressure"));
        assert_eq!(events[1].node_name(), "gpt_processing");
        assert_eq!(
            events[1].output.as_deref(),
            Some("Diagnosis based on: Low fuel pressure")
        );
        assert_eq!(events[1].state.stage(), PipelineStage::Formatted);
    }

    #[tokio::test]
    async fn test_streaming_mode_defers_format_and_matches_blocking() {
        let log = CallLog::default();
        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = echo_pipeline(&log, "EGR valve clogged")
            .with_store(store.clone())
            .with_format_mode(FormatMode::Streaming);

        let events: Vec<PipelineEvent> = pipeline
            .stream("Black smoke", Some("t"))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_deferred());
        assert_eq!(events[1].node_name(), "gpt_processing");

        let state = events[1].state.clone();
        let fragments: Vec<String> = pipeline
            .stream_answer(&state)
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert!(fragments.len() > 1);
        let streamed = fragments.concat();

        let blocking = pipeline
            .format_stage()
            .format(&state.question, &state.search_result)
            .await
            .unwrap();
        assert_eq!(streamed, blocking);

        let done = pipeline.complete_streamed(state, streamed.clone(), Some("t"));
        assert_eq!(done.final_answer, streamed);
        assert_eq!(store.get("t"), Some(done));
        assert_eq!(store.history("t").len(), 2);
    }

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let mut search = MockSearchProvider::new();
        search
            .expect_search()
            .returning(|_| Err(DiagError::Upstream("connection reset".into())));
        let mut model = MockChatModel::new();
        model.expect_invoke().times(0);

        let pipeline = DiagnosticPipeline::new(
            SearchStage::new(Arc::new(search)),
            FormatStage::new(Arc::new(model)),
        );

        let items: Vec<DiagResult<PipelineEvent>> =
            pipeline.stream("Knocking", None).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().to_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_checkpoints_written_per_transition() {
        let log = CallLog::default();
        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = echo_pipeline(&log, "Wheel bearing").with_store(store.clone());

        pipeline.run("Humming at speed", Some("thread-1")).await.unwrap();

        let history = store.history("thread-1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, PipelineStage::Searched);
        assert!(history[0].state.final_answer.is_empty());
        assert_eq!(history[1].stage, PipelineStage::Formatted);
        assert!(store.get("thread-2").is_none());
    }

    #[tokio::test]
    async fn test_rerun_on_thread_starts_fresh() {
        let log = CallLog::default();
        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = echo_pipeline(&log, "CV joint").with_store(store.clone());

        pipeline.run("Clicking when turning", Some("t")).await.unwrap();
        pipeline.run("Clicking when turning", Some("t")).await.unwrap();

        // Both runs searched again; nothing was resumed from the checkpoint.
        let searches = log.entries().iter().filter(|c| c.starts_with("search:")).count();
        assert_eq!(searches, 2);
        let history = store.history("t");
        assert_eq!(history.len(), 4);
        assert!(history[2].state.final_answer.is_empty());
    }

    #[tokio::test]
    async fn test_no_checkpoint_without_thread_or_when_disabled() {
        let log = CallLog::default();
        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = echo_pipeline(&log, "x")
            .with_store(store.clone())
            .with_options(PipelineOptions {
                format_mode: FormatMode::Blocking,
                checkpointing: false,
            });

        pipeline.run("q", Some("t")).await.unwrap();
        pipeline.run("q", None).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_search_result_passes_through_with_stage_labels() {
        let mut search = MockSearchProvider::new();
        search.expect_search().times(1).returning(|_| Ok(String::new()));
        let mut model = MockChatModel::new();
        model
            .expect_invoke()
            .withf(|prompt| prompt.contains("WEB SEARCH DATA: \n"))
            .times(1)
            .returning(|_| Ok(String::new()));

        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = DiagnosticPipeline::new(
            SearchStage::new(Arc::new(search)),
            FormatStage::new(Arc::new(model)),
        )
        .with_store(store.clone());

        let (search_result, answer) = pipeline.run("No crank", Some("t")).await.unwrap();
        assert!(search_result.is_empty());
        assert!(answer.is_empty());

        let stages: Vec<PipelineStage> = store.history("t").iter().map(|c| c.stage).collect();
        assert_eq!(stages, vec![PipelineStage::Searched, PipelineStage::Formatted]);
    }

    #[tokio::test]
    async fn test_empty_streamed_answer_is_labelled_formatted() {
        let log = CallLog::default();
        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = echo_pipeline(&log, "Starter relay")
            .with_store(store.clone())
            .with_format_mode(FormatMode::Streaming);

        let events: Vec<PipelineEvent> = pipeline
            .stream("Click, no crank", Some("t"))
            .map(|e| e.unwrap())
            .collect()
            .await;
        pipeline.complete_streamed(events[1].state.clone(), String::new(), Some("t"));

        let latest = store.latest("t").unwrap();
        assert_eq!(latest.stage, PipelineStage::Formatted);
        assert!(latest.state.final_answer.is_empty());
    }

    #[tokio::test]
    async fn test_format_failure_propagates_after_search_checkpoint() {
        let mut search = MockSearchProvider::new();
        search
            .expect_search()
            .times(1)
            .returning(|_| Ok("Failed ignition coil".to_string()));
        let mut model = MockChatModel::new();
        model
            .expect_invoke()
            .times(1)
            .returning(|_| Err(DiagError::Upstream("insufficient_quota".into())));

        let store = Arc::new(InMemoryThreadStore::new());
        let pipeline = DiagnosticPipeline::new(
            SearchStage::new(Arc::new(search)),
            FormatStage::new(Arc::new(model)),
        )
        .with_store(store.clone());

        let err = pipeline.run("Misfire under load", Some("t")).await.unwrap_err();
        assert_eq!(err.to_string(), "insufficient_quota");

        let history = store.history("t");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].stage, PipelineStage::Searched);
        assert!(history[0].state.final_answer.is_empty());
    }
}
