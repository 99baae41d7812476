//! LLM-context projection: events → chronological chat messages.

use serde_json::Value;

use crate::event::{Envelope, EventBody, ToolCall};

/// One message in the LLM conversation context, in provider-neutral shape.
/// Adapters translate these into their provider's wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextMessage {
    /// A user turn.
    User { content: String },
    /// An assistant turn: text plus the tool calls it requested.
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    /// A tool result (or tool failure) turn, linked to its originating call.
    Tool {
        content: String,
        tool_call_id: Option<String>,
    },
}

/// Folds events into the message sequence for a chat-style LLM.
///
/// `UserMessageAdded` → user, `LLMResponseReceived` → assistant (text plus
/// tool-call stubs), `ToolExecutionCompleted`/`Failed` → tool messages
/// carrying the `tool_call_id` from the event metadata. Everything else is
/// ignored. An in-flight tool chain (calls without results yet) still yields
/// a valid context; the engine finishes the chain before calling the LLM.
pub fn llm_context(events: &[Envelope]) -> Vec<ContextMessage> {
    let mut messages = Vec::new();
    for event in events {
        match event.body() {
            EventBody::UserMessageAdded(p) => {
                messages.push(ContextMessage::User { content: p.message });
            }
            EventBody::LlmResponseReceived(p) => {
                messages.push(ContextMessage::Assistant {
                    content: p.response_text,
                    tool_calls: p.tool_calls,
                });
            }
            EventBody::ToolExecutionCompleted(p) => {
                messages.push(ContextMessage::Tool {
                    content: render_result(&p.result),
                    tool_call_id: event.metadata.tool_call_id.clone(),
                });
            }
            EventBody::ToolExecutionFailed(p) => {
                messages.push(ContextMessage::Tool {
                    content: format!("Tool '{}' failed: {}", p.tool_name, p.error_message),
                    tool_call_id: event.metadata.tool_call_id.clone(),
                });
            }
            _ => {}
        }
    }
    messages
}

/// Tool results are JSON; string results pass through unquoted so the model
/// sees the raw text.
fn render_result(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
