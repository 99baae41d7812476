//! Pending tool-calls projection.

use std::collections::HashSet;

use crate::event::{Envelope, EventBody, ToolCall};

/// Tool calls of the most recent `LLMResponseReceived` that have no matching
/// `ToolExecutionCompleted`/`Failed` event after that response. Matching is
/// by `tool_call_id` in the event metadata. Returns `[]` when nothing is
/// pending.
///
/// This is the tie-break that keeps [`next_step`](super::next_step) inside
/// tool execution after a crash mid-chain: requests without results, or
/// results for only some of a response's calls, leave the remainder pending.
pub fn pending_tool_calls(events: &[Envelope]) -> Vec<ToolCall> {
    let mut latest_calls: Vec<ToolCall> = Vec::new();
    let mut resolved: HashSet<String> = HashSet::new();

    for event in events {
        match event.body() {
            EventBody::LlmResponseReceived(p) => {
                latest_calls = p.tool_calls;
                resolved.clear();
            }
            EventBody::ToolExecutionCompleted(_) | EventBody::ToolExecutionFailed(_) => {
                if let Some(id) = &event.metadata.tool_call_id {
                    resolved.insert(id.clone());
                }
            }
            _ => {}
        }
    }

    latest_calls
        .into_iter()
        .filter(|call| !resolved.contains(&call.id))
        .collect()
}
