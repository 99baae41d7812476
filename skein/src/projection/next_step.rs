//! Next-step projection: the step-selection state machine.

use crate::event::{Envelope, EventBody};

use super::pending_tool_calls;

/// What the engine should do next for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Call the LLM with the projected context.
    LlmCall,
    /// Execute the pending tool calls.
    ToolExecution,
    /// Stop processing; the stream is terminal or the turn is complete.
    Termination,
}

/// Decides the next step from the last event ("last event wins"), with one
/// tie-break: unresolved tool calls pull the machine back to tool execution,
/// so a crash mid-chain resumes where it left off.
///
/// An empty stream and unknown kinds both route to `LlmCall` — forward
/// progress over rejection.
pub fn next_step(events: &[Envelope]) -> NextStep {
    let Some(last) = events.last() else {
        return NextStep::LlmCall;
    };
    match last.body() {
        EventBody::UserMessageAdded(_) => NextStep::LlmCall,
        EventBody::LlmResponseReceived(response) => {
            if response.tool_calls.is_empty() {
                // Agent finished its turn; control returns to the caller.
                NextStep::Termination
            } else {
                NextStep::ToolExecution
            }
        }
        EventBody::ToolExecutionRequested(_)
        | EventBody::ToolExecutionCompleted(_)
        | EventBody::ToolExecutionFailed(_) => {
            if pending_tool_calls(events).is_empty() {
                NextStep::LlmCall
            } else {
                NextStep::ToolExecution
            }
        }
        // Retry budget is engine policy; the projection just points back at
        // the LLM.
        EventBody::LlmCallFailed(_) => NextStep::LlmCall,
        EventBody::SessionTerminationRequested(_) | EventBody::SessionCompleted(_) => {
            NextStep::Termination
        }
        EventBody::SessionStarted(_) | EventBody::Unknown { .. } => NextStep::LlmCall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        CompletionReason, LlmCallFailed, LlmResponseReceived, Metadata, SessionCompleted,
        SessionStarted, SessionTerminationRequested, TokenUsage, ToolCall,
        ToolExecutionCompleted, ToolExecutionRequested, UserMessageAdded,
    };
    use crate::stream::StreamName;
    use chrono::Utc;
    use uuid::Uuid;

    fn envelope_at(position: u64, body: EventBody, metadata: Metadata) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            stream_name: StreamName::for_thread(Uuid::nil()).to_string(),
            kind: body.kind().to_string(),
            data: body.to_data(),
            metadata,
            position,
            global_position: position,
            time: Utc::now(),
        }
    }

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "echo".into(),
            arguments: serde_json::json!({}),
        }
    }

    fn response(calls: Vec<ToolCall>) -> EventBody {
        EventBody::LlmResponseReceived(
            LlmResponseReceived::new("text", calls, "m", TokenUsage::default()).unwrap(),
        )
    }

    fn completed(id: &str) -> (EventBody, Metadata) {
        (
            EventBody::ToolExecutionCompleted(ToolExecutionCompleted {
                tool_name: "echo".into(),
                result: serde_json::json!(null),
                execution_time_ms: 0,
            }),
            Metadata::for_tool_call(id, 0),
        )
    }

    /// **Scenario**: the routing table from the design, one row per case.
    #[test]
    fn routes_by_last_event() {
        // Empty stream → forward progress.
        assert_eq!(next_step(&[]), NextStep::LlmCall);

        // UserMessageAdded → LLM call.
        let user = envelope_at(
            0,
            EventBody::UserMessageAdded(UserMessageAdded::new("hi", Utc::now()).unwrap()),
            Metadata::default(),
        );
        assert_eq!(next_step(&[user.clone()]), NextStep::LlmCall);

        // Response with tool calls → tool execution.
        let with_tools = envelope_at(1, response(vec![call("a")]), Metadata::default());
        assert_eq!(
            next_step(&[user.clone(), with_tools.clone()]),
            NextStep::ToolExecution
        );

        // Response without tool calls → termination (turn complete).
        let no_tools = envelope_at(1, response(vec![]), Metadata::default());
        assert_eq!(next_step(&[user.clone(), no_tools]), NextStep::Termination);

        // LLM failure → back to the LLM; the engine owns the retry budget.
        let failed = envelope_at(
            1,
            EventBody::LlmCallFailed(LlmCallFailed {
                error_message: "x".into(),
                retry_count: 2,
            }),
            Metadata::default(),
        );
        assert_eq!(next_step(&[user.clone(), failed]), NextStep::LlmCall);

        // Terminal events → termination.
        let terminated = envelope_at(
            1,
            EventBody::SessionTerminationRequested(SessionTerminationRequested::default()),
            Metadata::default(),
        );
        assert_eq!(next_step(&[user.clone(), terminated]), NextStep::Termination);
        let completed_session = envelope_at(
            1,
            EventBody::SessionCompleted(SessionCompleted {
                completion_reason: CompletionReason::Success,
            }),
            Metadata::default(),
        );
        assert_eq!(
            next_step(&[user.clone(), completed_session]),
            NextStep::Termination
        );

        // SessionStarted and unknown kinds default to forward progress.
        let started = envelope_at(
            0,
            EventBody::SessionStarted(SessionStarted {
                thread_id: Uuid::nil(),
                initial_context: None,
            }),
            Metadata::default(),
        );
        assert_eq!(next_step(&[started]), NextStep::LlmCall);
        let unknown = envelope_at(
            0,
            EventBody::Unknown {
                kind: "Mystery".into(),
                data: serde_json::json!({}),
            },
            Metadata::default(),
        );
        assert_eq!(next_step(&[unknown]), NextStep::LlmCall);
    }

    /// **Scenario**: after a completion, remaining pending calls keep the
    /// machine in tool execution; once all are resolved it returns to the LLM.
    #[test]
    fn pending_calls_tie_break() {
        let two_calls = envelope_at(
            0,
            response(vec![call("a"), call("b")]),
            Metadata::default(),
        );
        let (done_a, meta_a) = completed("a");
        let first_done = envelope_at(1, done_a, meta_a);
        assert_eq!(
            next_step(&[two_calls.clone(), first_done.clone()]),
            NextStep::ToolExecution
        );

        let (done_b, meta_b) = completed("b");
        let second_done = envelope_at(2, done_b, meta_b);
        assert_eq!(
            next_step(&[two_calls, first_done, second_done]),
            NextStep::LlmCall
        );
    }

    /// **Scenario**: a crash after ToolExecutionRequested (no result yet)
    /// resumes tool execution on the next pass.
    #[test]
    fn dangling_request_resumes_tool_execution() {
        let events = vec![
            envelope_at(0, response(vec![call("a")]), Metadata::default()),
            envelope_at(
                1,
                EventBody::ToolExecutionRequested(ToolExecutionRequested {
                    tool_name: "echo".into(),
                    arguments: serde_json::json!({}),
                }),
                Metadata::for_tool_call("a", 0),
            ),
        ];
        assert_eq!(next_step(&events), NextStep::ToolExecution);
    }
}
