//! Session-state projection: one pass over the stream into status + counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::event::{CompletionReason, Envelope, EventBody};
use crate::stream::StreamName;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Terminated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Aggregate view of one session, derived from its stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Parsed from the stream name of the first event; `None` for an empty
    /// stream or a non-standard stream name.
    pub thread_id: Option<Uuid>,
    pub user_messages: u64,
    pub llm_responses: u64,
    pub tool_calls: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn empty() -> Self {
        Self {
            status: SessionStatus::Active,
            thread_id: None,
            user_messages: 0,
            llm_responses: 0,
            tool_calls: 0,
            errors: 0,
            started_at: None,
            last_activity_at: None,
            ended_at: None,
        }
    }
}

/// Folds the stream once. `status` stays `Active` until a terminal event;
/// `SessionCompleted` maps success → completed, failure/timeout → failed,
/// user_terminated → terminated; a bare `SessionTerminationRequested` counts
/// as terminated.
pub fn session_state(events: &[Envelope]) -> SessionState {
    let mut state = SessionState::empty();

    if let Some(first) = events.first() {
        state.started_at = Some(first.time);
        state.thread_id = StreamName::parse(&first.stream_name)
            .ok()
            .map(|name| name.thread_id());
    }

    for event in events {
        state.last_activity_at = Some(event.time);
        match event.body() {
            EventBody::UserMessageAdded(_) => state.user_messages += 1,
            EventBody::LlmResponseReceived(_) => state.llm_responses += 1,
            EventBody::ToolExecutionRequested(_) => state.tool_calls += 1,
            EventBody::LlmCallFailed(_) | EventBody::ToolExecutionFailed(_) => state.errors += 1,
            EventBody::SessionTerminationRequested(_) => {
                state.status = SessionStatus::Terminated;
                state.ended_at = Some(event.time);
            }
            EventBody::SessionCompleted(p) => {
                state.status = match p.completion_reason {
                    CompletionReason::Success => SessionStatus::Completed,
                    CompletionReason::Failure | CompletionReason::Timeout => SessionStatus::Failed,
                    CompletionReason::UserTerminated => SessionStatus::Terminated,
                };
                state.ended_at = Some(event.time);
            }
            _ => {}
        }
    }
    state
}
