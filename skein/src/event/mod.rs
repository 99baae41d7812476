//! Event model: typed payloads per kind under a universal envelope.
//!
//! Every event carries the same envelope fields (id, kind, data, metadata,
//! per-stream position, global position, time, stream name). The `data`
//! payload is typed per kind via [`EventBody`]; kinds unknown to this build
//! decode as [`EventBody::Unknown`] so old readers never crash on newer
//! streams. Payload invariants are enforced by `Result`-returning
//! constructors; payloads are immutable after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Event kind tags as written to the log. Stable wire contract.
pub mod kind {
    pub const SESSION_STARTED: &str = "SessionStarted";
    pub const USER_MESSAGE_ADDED: &str = "UserMessageAdded";
    pub const LLM_RESPONSE_RECEIVED: &str = "LLMResponseReceived";
    pub const LLM_CALL_FAILED: &str = "LLMCallFailed";
    pub const TOOL_EXECUTION_REQUESTED: &str = "ToolExecutionRequested";
    pub const TOOL_EXECUTION_COMPLETED: &str = "ToolExecutionCompleted";
    pub const TOOL_EXECUTION_FAILED: &str = "ToolExecutionFailed";
    pub const SESSION_TERMINATION_REQUESTED: &str = "SessionTerminationRequested";
    pub const SESSION_COMPLETED: &str = "SessionCompleted";
}

/// Payload invariant violations, raised at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("user message must be non-empty")]
    EmptyUserMessage,
    #[error("LLM response must carry text or at least one tool call")]
    EmptyLlmResponse,
}

/// Universal event envelope as read from (or written to) the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique event id.
    pub id: Uuid,
    /// Owning stream, `category:version-threadId`.
    pub stream_name: String,
    /// Kind tag; see [`kind`].
    pub kind: String,
    /// Structured payload; decode with [`Envelope::body`].
    pub data: Value,
    /// Structured metadata; empty object when absent.
    pub metadata: Metadata,
    /// Per-stream position, 0-based, contiguous.
    pub position: u64,
    /// Store-wide position; monotonic across all streams.
    pub global_position: u64,
    /// Instant the store recorded the event (UTC).
    pub time: DateTime<Utc>,
}

impl Envelope {
    /// Decodes the payload by kind. Unknown kinds and payloads that no longer
    /// match their kind's schema yield [`EventBody::Unknown`]; readers stay
    /// total.
    pub fn body(&self) -> EventBody {
        EventBody::decode(&self.kind, self.data.clone())
    }
}

/// Event metadata. `tool_call_id` / `tool_index` link tool lifecycle events
/// back to the originating call in an `LLMResponseReceived`; other keys are
/// carried opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_index: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Metadata linking a tool lifecycle event to its originating call.
    pub fn for_tool_call(tool_call_id: impl Into<String>, tool_index: u32) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_index: Some(tool_index),
            extra: Map::new(),
        }
    }
}

/// One tool invocation requested by the model. `id` is unique within its
/// response and is echoed in the metadata of the matching
/// `ToolExecutionRequested`/`Completed`/`Failed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token accounting for one LLM call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Why a session ended; payload of `SessionCompleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Success,
    Failure,
    Timeout,
    UserTerminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStarted {
    pub thread_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessageAdded {
    pub message: String,
    /// ISO-8601 instant the message was accepted.
    pub timestamp: String,
}

impl UserMessageAdded {
    /// Rejects empty messages; stamps the given instant as ISO-8601.
    pub fn new(message: impl Into<String>, at: DateTime<Utc>) -> Result<Self, EventError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(EventError::EmptyUserMessage);
        }
        Ok(Self {
            message,
            timestamp: at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponseReceived {
    pub response_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub model_name: String,
    pub token_usage: TokenUsage,
}

impl LlmResponseReceived {
    /// Rejects responses that carry neither text nor tool calls.
    pub fn new(
        response_text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        model_name: impl Into<String>,
        token_usage: TokenUsage,
    ) -> Result<Self, EventError> {
        let response_text = response_text.into();
        if response_text.is_empty() && tool_calls.is_empty() {
            return Err(EventError::EmptyLlmResponse);
        }
        Ok(Self {
            response_text,
            tool_calls,
            model_name: model_name.into(),
            token_usage,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCallFailed {
    pub error_message: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRequested {
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionCompleted {
    pub tool_name: String,
    pub result: Value,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionFailed {
    pub tool_name: String,
    pub error_message: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTerminationRequested {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCompleted {
    pub completion_reason: CompletionReason,
}

/// Sum of all event payloads this build understands, plus `Unknown` for
/// everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    SessionStarted(SessionStarted),
    UserMessageAdded(UserMessageAdded),
    LlmResponseReceived(LlmResponseReceived),
    LlmCallFailed(LlmCallFailed),
    ToolExecutionRequested(ToolExecutionRequested),
    ToolExecutionCompleted(ToolExecutionCompleted),
    ToolExecutionFailed(ToolExecutionFailed),
    SessionTerminationRequested(SessionTerminationRequested),
    SessionCompleted(SessionCompleted),
    Unknown { kind: String, data: Value },
}

impl EventBody {
    /// The kind tag written to the log for this payload.
    pub fn kind(&self) -> &str {
        match self {
            EventBody::SessionStarted(_) => kind::SESSION_STARTED,
            EventBody::UserMessageAdded(_) => kind::USER_MESSAGE_ADDED,
            EventBody::LlmResponseReceived(_) => kind::LLM_RESPONSE_RECEIVED,
            EventBody::LlmCallFailed(_) => kind::LLM_CALL_FAILED,
            EventBody::ToolExecutionRequested(_) => kind::TOOL_EXECUTION_REQUESTED,
            EventBody::ToolExecutionCompleted(_) => kind::TOOL_EXECUTION_COMPLETED,
            EventBody::ToolExecutionFailed(_) => kind::TOOL_EXECUTION_FAILED,
            EventBody::SessionTerminationRequested(_) => kind::SESSION_TERMINATION_REQUESTED,
            EventBody::SessionCompleted(_) => kind::SESSION_COMPLETED,
            EventBody::Unknown { kind, .. } => kind,
        }
    }

    /// Serializes the payload to its stable JSON representation.
    pub fn to_data(&self) -> Value {
        let encoded = match self {
            EventBody::SessionStarted(p) => serde_json::to_value(p),
            EventBody::UserMessageAdded(p) => serde_json::to_value(p),
            EventBody::LlmResponseReceived(p) => serde_json::to_value(p),
            EventBody::LlmCallFailed(p) => serde_json::to_value(p),
            EventBody::ToolExecutionRequested(p) => serde_json::to_value(p),
            EventBody::ToolExecutionCompleted(p) => serde_json::to_value(p),
            EventBody::ToolExecutionFailed(p) => serde_json::to_value(p),
            EventBody::SessionTerminationRequested(p) => serde_json::to_value(p),
            EventBody::SessionCompleted(p) => serde_json::to_value(p),
            EventBody::Unknown { data, .. } => return data.clone(),
        };
        // Payload structs only hold JSON-representable fields.
        encoded.unwrap_or(Value::Null)
    }

    /// Decodes `(kind, data)` into a typed payload. Total: unknown kinds and
    /// payloads that fail their kind's schema become [`EventBody::Unknown`].
    pub fn decode(kind_tag: &str, data: Value) -> EventBody {
        fn typed<T, F>(data: Value, wrap: F, kind_tag: &str) -> EventBody
        where
            T: serde::de::DeserializeOwned,
            F: FnOnce(T) -> EventBody,
        {
            match serde_json::from_value::<T>(data.clone()) {
                Ok(payload) => wrap(payload),
                Err(_) => EventBody::Unknown {
                    kind: kind_tag.to_string(),
                    data,
                },
            }
        }

        match kind_tag {
            kind::SESSION_STARTED => typed(data, EventBody::SessionStarted, kind_tag),
            kind::USER_MESSAGE_ADDED => typed(data, EventBody::UserMessageAdded, kind_tag),
            kind::LLM_RESPONSE_RECEIVED => typed(data, EventBody::LlmResponseReceived, kind_tag),
            kind::LLM_CALL_FAILED => typed(data, EventBody::LlmCallFailed, kind_tag),
            kind::TOOL_EXECUTION_REQUESTED => {
                typed(data, EventBody::ToolExecutionRequested, kind_tag)
            }
            kind::TOOL_EXECUTION_COMPLETED => {
                typed(data, EventBody::ToolExecutionCompleted, kind_tag)
            }
            kind::TOOL_EXECUTION_FAILED => typed(data, EventBody::ToolExecutionFailed, kind_tag),
            kind::SESSION_TERMINATION_REQUESTED => {
                typed(data, EventBody::SessionTerminationRequested, kind_tag)
            }
            kind::SESSION_COMPLETED => typed(data, EventBody::SessionCompleted, kind_tag),
            _ => EventBody::Unknown {
                kind: kind_tag.to_string(),
                data,
            },
        }
    }

    /// True for the kinds whose presence ends a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventBody::SessionCompleted(_) | EventBody::SessionTerminationRequested(_)
        )
    }
}
