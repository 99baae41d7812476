//! Processing engine: session lifecycle and the step loop.
//!
//! The engine is stateless between steps. Each iteration re-reads the
//! stream, asks the next-step projection what to do — it never inspects
//! events itself, so routing policy lives in one place — executes that step,
//! and appends the outcome. Every append carries the position observed by
//! the read, so a concurrent writer on the same stream surfaces as a
//! [`StoreError::ConcurrencyConflict`] instead of interleaved history; the
//! conflict is returned to the caller, who re-runs the pass.
//!
//! LLM retries are ephemeral: nothing is written between attempts, only a
//! final `LLMCallFailed` when the budget is exhausted. The tool step is not
//! atomic across calls; a crash between `ToolExecutionRequested` and its
//! completion is healed by the pending-tool-calls projection on the next
//! pass.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{
    CompletionReason, Envelope, EventBody, EventError, LlmCallFailed, LlmResponseReceived,
    Metadata, SessionCompleted, SessionStarted, ToolExecutionCompleted, ToolExecutionFailed,
    ToolExecutionRequested, UserMessageAdded,
};
use crate::llm::{LlmAdapter, LlmError};
use crate::projection::{llm_context, next_step, pending_tool_calls, session_state, NextStep,
    SessionState};
use crate::store::{EventStore, StoreError, NO_STREAM};
use crate::stream::{StreamName, StreamNameError, DEFAULT_CATEGORY, DEFAULT_VERSION};
use crate::tools::{self, ToolRegistry};

/// Default cap on loop iterations per processing pass.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default LLM retry budget (attempts beyond the first).
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Engine failures that reach the caller. Tool failures never appear here —
/// they are recorded as events and processing continues. An exhausted LLM
/// retry budget is both recorded (`LLMCallFailed`) and surfaced, since the
/// pass cannot make progress without a working provider.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Stream(#[from] StreamNameError),
    #[error("no session stream exists for thread {0}")]
    UnknownThread(Uuid),
    #[error("llm call failed after {retry_count} retries: {message}")]
    LlmRetriesExhausted { message: String, retry_count: u32 },
    #[error("no terminal event after {0} iterations; session completed as timeout")]
    MaxIterationsExceeded(u32),
}

/// Event-sourced agent session processor. Cheap to share: holds `Arc`s to
/// the store, the LLM adapter, and the read-only tool registry.
pub struct ProcessingEngine {
    store: Arc<dyn EventStore>,
    llm: Arc<dyn LlmAdapter>,
    registry: Arc<ToolRegistry>,
    category: String,
    version: String,
    system_prompt: Option<String>,
    max_iterations: u32,
    max_retries: u32,
}

impl ProcessingEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        llm: Arc<dyn LlmAdapter>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            store,
            llm,
            registry,
            category: DEFAULT_CATEGORY.to_string(),
            version: DEFAULT_VERSION.to_string(),
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Stream category for new and addressed sessions (builder).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Stream schema version segment (builder).
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// System prompt passed to every LLM call (builder).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Iteration cap per processing pass (builder).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// LLM retry budget per step (builder).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn stream_for(&self, thread_id: Uuid) -> Result<StreamName, StreamNameError> {
        StreamName::new(&self.category, &self.version, thread_id)
    }

    /// Starts a new session: fresh thread id, `SessionStarted` on a stream
    /// that must not exist yet, then the first `UserMessageAdded`.
    pub async fn start_session(&self, initial_message: &str) -> Result<Uuid, EngineError> {
        let thread_id = Uuid::new_v4();
        let stream = self.stream_for(thread_id)?;
        // Validate the message before the stream exists.
        let message = UserMessageAdded::new(initial_message, Utc::now())?;

        let started = SessionStarted {
            thread_id,
            initial_context: None,
        };
        self.store
            .append(
                &stream,
                &EventBody::SessionStarted(started),
                &Metadata::default(),
                NO_STREAM,
            )
            .await?;

        self.store
            .append(
                &stream,
                &EventBody::UserMessageAdded(message),
                &Metadata::default(),
                0,
            )
            .await?;

        info!(%thread_id, stream = %stream, "session started");
        Ok(thread_id)
    }

    /// Appends a user message to an existing session.
    pub async fn add_user_message(
        &self,
        thread_id: Uuid,
        message: &str,
    ) -> Result<(), EngineError> {
        let stream = self.stream_for(thread_id)?;
        let events = self.store.read_stream(&stream).await?;
        if events.is_empty() {
            return Err(EngineError::UnknownThread(thread_id));
        }
        let body = EventBody::UserMessageAdded(UserMessageAdded::new(message, Utc::now())?);
        self.store
            .append(&stream, &body, &Metadata::default(), head_version(&events))
            .await?;
        Ok(())
    }

    /// Appends `SessionCompleted` with the given reason. Idempotent: a stream
    /// whose last event is already terminal is left untouched.
    pub async fn terminate_session(
        &self,
        thread_id: Uuid,
        reason: CompletionReason,
    ) -> Result<(), EngineError> {
        let stream = self.stream_for(thread_id)?;
        let events = self.store.read_stream(&stream).await?;
        if events.is_empty() {
            return Err(EngineError::UnknownThread(thread_id));
        }
        if events.last().map(|e| e.body().is_terminal()).unwrap_or(false) {
            return Ok(());
        }
        let completed = SessionCompleted {
            completion_reason: reason,
        };
        self.store
            .append(
                &stream,
                &EventBody::SessionCompleted(completed),
                &Metadata::default(),
                head_version(&events),
            )
            .await?;
        info!(%thread_id, ?reason, "session terminated");
        Ok(())
    }

    /// Runs the step loop until the next-step projection says stop, the
    /// iteration cap is hit, or `cancel` fires. Returns the resulting
    /// session state.
    pub async fn process_thread(&self, thread_id: Uuid) -> Result<SessionState, EngineError> {
        self.process_thread_with_cancel(thread_id, CancellationToken::new())
            .await
    }

    /// [`process_thread`](Self::process_thread) with cooperative
    /// cancellation: checked between steps; an in-flight store operation is
    /// finished, no new step starts.
    pub async fn process_thread_with_cancel(
        &self,
        thread_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<SessionState, EngineError> {
        let stream = self.stream_for(thread_id)?;
        let mut terminated = false;

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                info!(%thread_id, iteration, "processing cancelled");
                break;
            }
            let events = self.store.read_stream(&stream).await?;
            let step = next_step(&events);
            debug!(%thread_id, iteration, ?step, events = events.len(), "step selected");
            match step {
                NextStep::Termination => {
                    terminated = true;
                    break;
                }
                NextStep::LlmCall => self.execute_llm_step(&stream, &events).await?,
                NextStep::ToolExecution => self.execute_tool_step(&stream, &events).await?,
            }
        }

        if !terminated && !cancel.is_cancelled() {
            let events = self.store.read_stream(&stream).await?;
            let timeout = SessionCompleted {
                completion_reason: CompletionReason::Timeout,
            };
            self.store
                .append(
                    &stream,
                    &EventBody::SessionCompleted(timeout),
                    &Metadata::default(),
                    head_version(&events),
                )
                .await?;
            warn!(%thread_id, max_iterations = self.max_iterations, "iteration cap reached");
            return Err(EngineError::MaxIterationsExceeded(self.max_iterations));
        }

        let events = self.store.read_stream(&stream).await?;
        Ok(session_state(&events))
    }

    /// One LLM step: project context, call the adapter with the registry's
    /// tool declarations (omitted when empty), and append the outcome.
    /// Retries stay in memory; exhaustion writes `LLMCallFailed` and ends
    /// the pass with [`EngineError::LlmRetriesExhausted`].
    async fn execute_llm_step(
        &self,
        stream: &StreamName,
        events: &[Envelope],
    ) -> Result<(), EngineError> {
        let context = llm_context(events);
        let specs = (!self.registry.is_empty()).then(|| self.registry.specs());
        let expected = head_version(events);

        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .llm
                .call(&context, specs.as_deref(), self.system_prompt.as_deref())
                .await
                .and_then(|response| {
                    // A reply with neither text nor tool calls is treated as a
                    // malformed provider response, not a valid "no reply".
                    LlmResponseReceived::new(
                        response.response_text,
                        response.tool_calls,
                        response.model_name,
                        response.token_usage,
                    )
                    .map_err(|e| LlmError::MalformedResponse(e.to_string()))
                });

            match outcome {
                Ok(body) => {
                    debug!(
                        stream = %stream,
                        tool_calls = body.tool_calls.len(),
                        tokens = body.token_usage.total,
                        "llm response received"
                    );
                    self.store
                        .append(
                            stream,
                            &EventBody::LlmResponseReceived(body),
                            &Metadata::default(),
                            expected,
                        )
                        .await?;
                    return Ok(());
                }
                Err(error) if error.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(stream = %stream, attempt, %error, "llm call failed, retrying");
                }
                Err(error) => {
                    warn!(stream = %stream, retry_count = attempt, %error, "llm call failed, recording failure");
                    let failed = LlmCallFailed {
                        error_message: error.to_string(),
                        retry_count: attempt,
                    };
                    self.store
                        .append(
                            stream,
                            &EventBody::LlmCallFailed(failed),
                            &Metadata::default(),
                            expected,
                        )
                        .await?;
                    // The failure is on the stream; the pass stops here
                    // instead of re-dialing a dead provider. A later pass
                    // resumes from LLMCallFailed.
                    return Err(EngineError::LlmRetriesExhausted {
                        message: error.to_string(),
                        retry_count: attempt,
                    });
                }
            }
        }
    }

    /// One tool step: for each pending call, bracket the execution with
    /// `ToolExecutionRequested` and `Completed`/`Failed`, all linked by
    /// `tool_call_id` metadata.
    async fn execute_tool_step(
        &self,
        stream: &StreamName,
        events: &[Envelope],
    ) -> Result<(), EngineError> {
        let pending = pending_tool_calls(events);
        let mut expected = head_version(events);

        for (index, call) in pending.iter().enumerate() {
            let metadata = Metadata::for_tool_call(&call.id, index as u32);

            let requested = ToolExecutionRequested {
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            };
            expected = self
                .store
                .append(
                    stream,
                    &EventBody::ToolExecutionRequested(requested),
                    &metadata,
                    expected,
                )
                .await? as i64;

            let result = tools::execute(&call.name, call.arguments.clone(), &self.registry).await;
            let body = if result.success {
                EventBody::ToolExecutionCompleted(ToolExecutionCompleted {
                    tool_name: result.tool_name,
                    result: result.result.unwrap_or(serde_json::Value::Null),
                    execution_time_ms: result.execution_time_ms,
                })
            } else {
                let error_message = result.error.unwrap_or_else(|| "unknown error".to_string());
                warn!(stream = %stream, tool = %call.name, error = %error_message, "tool failed");
                EventBody::ToolExecutionFailed(ToolExecutionFailed {
                    tool_name: result.tool_name,
                    error_message,
                    retry_count: 0,
                })
            };
            expected = self.store.append(stream, &body, &metadata, expected).await? as i64;
        }
        Ok(())
    }
}

/// The stream head as an `expected_version`: position of the last event, or
/// [`NO_STREAM`] for an empty stream.
fn head_version(events: &[Envelope]) -> i64 {
    events
        .last()
        .map(|e| e.position as i64)
        .unwrap_or(NO_STREAM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::kind;
    use crate::llm::MockLlm;
    use crate::store::InMemoryEventStore;

    fn engine_with(llm: MockLlm) -> (Arc<InMemoryEventStore>, ProcessingEngine) {
        let store = Arc::new(InMemoryEventStore::new());
        let engine = ProcessingEngine::new(
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::new(llm),
            Arc::new(ToolRegistry::with_builtins()),
        );
        (store, engine)
    }

    async fn kinds(store: &InMemoryEventStore, stream: &StreamName) -> Vec<String> {
        store
            .read_stream(stream)
            .await
            .unwrap()
            .iter()
            .map(|e| e.kind.clone())
            .collect()
    }

    /// **Scenario**: start_session writes SessionStarted at position 0 and the
    /// first user message at position 1.
    #[tokio::test]
    async fn start_session_writes_two_events() {
        let (store, engine) = engine_with(MockLlm::reply("unused"));
        let thread_id = engine.start_session("Hello").await.unwrap();
        let stream = StreamName::for_thread(thread_id);
        let events = store.read_stream(&stream).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, kind::SESSION_STARTED);
        assert_eq!(events[1].kind, kind::USER_MESSAGE_ADDED);
        assert_eq!(events[0].position, 0);
        assert_eq!(events[1].position, 1);
    }

    /// **Scenario**: an empty initial message is rejected before anything is
    /// written.
    #[tokio::test]
    async fn empty_initial_message_rejected() {
        let (store, engine) = engine_with(MockLlm::reply("unused"));
        let err = engine.start_session("").await.unwrap_err();
        assert!(matches!(err, EngineError::Event(EventError::EmptyUserMessage)));
        assert!(store.stream_names().is_empty());
    }

    /// **Scenario**: add_user_message on an unknown thread fails with
    /// UnknownThread.
    #[tokio::test]
    async fn message_to_unknown_thread_fails() {
        let (_store, engine) = engine_with(MockLlm::reply("unused"));
        let err = engine
            .add_user_message(Uuid::new_v4(), "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownThread(_)));
    }

    /// **Scenario**: terminate_session appends SessionCompleted once and is
    /// idempotent afterwards.
    #[tokio::test]
    async fn terminate_session_is_idempotent() {
        let (store, engine) = engine_with(MockLlm::reply("unused"));
        let thread_id = engine.start_session("Hello").await.unwrap();
        engine
            .terminate_session(thread_id, CompletionReason::UserTerminated)
            .await
            .unwrap();
        engine
            .terminate_session(thread_id, CompletionReason::UserTerminated)
            .await
            .unwrap();
        let stream = StreamName::for_thread(thread_id);
        let event_kinds = kinds(&store, &stream).await;
        assert_eq!(
            event_kinds,
            vec![
                kind::SESSION_STARTED,
                kind::USER_MESSAGE_ADDED,
                kind::SESSION_COMPLETED,
            ]
        );
    }

    /// **Scenario**: a cancelled token stops the loop before any step runs;
    /// the stream is left untouched and no timeout event is written.
    #[tokio::test]
    async fn cancellation_skips_steps() {
        let (store, engine) = engine_with(MockLlm::reply("never called"));
        let thread_id = engine.start_session("Hello").await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let state = engine
            .process_thread_with_cancel(thread_id, cancel)
            .await
            .unwrap();
        assert_eq!(state.llm_responses, 0);
        let stream = StreamName::for_thread(thread_id);
        assert_eq!(store.read_stream(&stream).await.unwrap().len(), 2);
    }
}
