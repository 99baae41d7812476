//! End-to-end engine scenarios on the in-memory store with a scripted LLM.

use std::sync::Arc;

use serde_json::json;

use skein::event::kind;
use skein::store::NO_STREAM;
use skein::{
    next_step, CompletionReason, Envelope, EventBody, EventStore, InMemoryEventStore, LlmError,
    MockLlm, NextStep, ProcessingEngine, SessionStatus, StreamName, ToolCall, ToolRegistry,
};

fn engine_on(store: &Arc<InMemoryEventStore>, llm: MockLlm) -> ProcessingEngine {
    ProcessingEngine::new(
        Arc::clone(store) as Arc<dyn EventStore>,
        Arc::new(llm),
        Arc::new(ToolRegistry::with_builtins()),
    )
}

async fn stream_events(store: &InMemoryEventStore, stream: &StreamName) -> Vec<Envelope> {
    store.read_stream(stream).await.unwrap()
}

fn kinds(events: &[Envelope]) -> Vec<&str> {
    events.iter().map(|e| e.kind.as_str()).collect()
}

fn assert_contiguous_positions(events: &[Envelope]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.position, i as u64, "positions must be 0..n-1");
    }
}

/// Single user turn, no tools: `[SessionStarted, UserMessageAdded,
/// LLMResponseReceived]`, next step termination.
#[tokio::test]
async fn single_turn_without_tools() {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = engine_on(&store, MockLlm::from_script(vec![Ok(MockLlm::text_response("Hi!"))]));

    let thread_id = engine.start_session("Hello").await.unwrap();
    let state = engine.process_thread(thread_id).await.unwrap();

    let events = stream_events(&store, &StreamName::for_thread(thread_id)).await;
    assert_eq!(
        kinds(&events),
        vec![
            kind::SESSION_STARTED,
            kind::USER_MESSAGE_ADDED,
            kind::LLM_RESPONSE_RECEIVED,
        ]
    );
    assert_contiguous_positions(&events);
    assert_eq!(next_step(&events), NextStep::Termination);
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.user_messages, 1);
    assert_eq!(state.llm_responses, 1);
}

/// Single tool call: the LLM asks for the time, the tool runs, the LLM is
/// re-called and answers with the result.
#[tokio::test]
async fn single_tool_call_round_trip() {
    let store = Arc::new(InMemoryEventStore::new());
    let llm = MockLlm::tool_call_then_reply(
        MockLlm::call_named("call-1", "get_current_time"),
        "It is now.",
    );
    let engine = engine_on(&store, llm);

    let thread_id = engine.start_session("what is the current time?").await.unwrap();
    let state = engine.process_thread(thread_id).await.unwrap();

    let events = stream_events(&store, &StreamName::for_thread(thread_id)).await;
    assert_eq!(
        kinds(&events),
        vec![
            kind::SESSION_STARTED,
            kind::USER_MESSAGE_ADDED,
            kind::LLM_RESPONSE_RECEIVED,
            kind::TOOL_EXECUTION_REQUESTED,
            kind::TOOL_EXECUTION_COMPLETED,
            kind::LLM_RESPONSE_RECEIVED,
        ]
    );
    assert_contiguous_positions(&events);
    assert_eq!(next_step(&events), NextStep::Termination);
    assert_eq!(state.tool_calls, 1);
    assert_eq!(state.errors, 0);

    // Request and completion are linked to the originating call.
    assert_eq!(events[3].metadata.tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(events[4].metadata.tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(events[3].metadata.tool_index, Some(0));

    // The tool produced a parseable ISO-8601 instant.
    match events[4].body() {
        EventBody::ToolExecutionCompleted(p) => {
            let text = p.result.as_str().expect("string result");
            chrono::DateTime::parse_from_rfc3339(text).expect("ISO-8601 timestamp");
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

/// Safe arithmetic: the exact expression string is recorded in the request
/// event and the result is 65.
#[tokio::test]
async fn calculator_happy_path() {
    let store = Arc::new(InMemoryEventStore::new());
    let llm = MockLlm::tool_call_then_reply(
        ToolCall {
            id: "call-1".into(),
            name: "calculate".into(),
            arguments: json!({"expression": "55 + 10"}),
        },
        "65",
    );
    let engine = engine_on(&store, llm);

    let thread_id = engine.start_session("compute 55 + 10").await.unwrap();
    engine.process_thread(thread_id).await.unwrap();

    let events = stream_events(&store, &StreamName::for_thread(thread_id)).await;
    match events[3].body() {
        EventBody::ToolExecutionRequested(p) => {
            assert_eq!(p.tool_name, "calculate");
            assert_eq!(p.arguments, json!({"expression": "55 + 10"}));
        }
        other => panic!("expected request, got {:?}", other),
    }
    match events[4].body() {
        EventBody::ToolExecutionCompleted(p) => assert_eq!(p.result, json!(65)),
        other => panic!("expected completion, got {:?}", other),
    }
}

/// Malicious arithmetic is rejected: the stream records a tool failure and
/// the engine keeps going to a final reply.
#[tokio::test]
async fn calculator_rejects_code() {
    let store = Arc::new(InMemoryEventStore::new());
    let llm = MockLlm::tool_call_then_reply(
        ToolCall {
            id: "call-1".into(),
            name: "calculate".into(),
            arguments: json!({"expression": "__import__('os').system('ls')"}),
        },
        "That expression is not valid arithmetic.",
    );
    let engine = engine_on(&store, llm);

    let thread_id = engine.start_session("run this").await.unwrap();
    let state = engine.process_thread(thread_id).await.unwrap();

    let events = stream_events(&store, &StreamName::for_thread(thread_id)).await;
    assert_eq!(
        kinds(&events),
        vec![
            kind::SESSION_STARTED,
            kind::USER_MESSAGE_ADDED,
            kind::LLM_RESPONSE_RECEIVED,
            kind::TOOL_EXECUTION_REQUESTED,
            kind::TOOL_EXECUTION_FAILED,
            kind::LLM_RESPONSE_RECEIVED,
        ]
    );
    match events[4].body() {
        EventBody::ToolExecutionFailed(p) => {
            assert_eq!(p.tool_name, "calculate");
            assert!(
                p.error_message.contains("unexpected character"),
                "got: {}",
                p.error_message
            );
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(state.errors, 1);
    assert_eq!(next_step(&events), NextStep::Termination);
}

/// LLM retry then failure: three raises with a budget of two append exactly
/// one LLMCallFailed{retry_count: 2}; a later pass with a working adapter
/// recovers.
#[tokio::test]
async fn llm_retries_then_failure_then_recovery() {
    let store = Arc::new(InMemoryEventStore::new());
    let broken = MockLlm::from_script(vec![
        Err(LlmError::Api("rate limited".into())),
        Err(LlmError::Api("rate limited".into())),
        Err(LlmError::Api("rate limited".into())),
    ]);
    let engine = engine_on(&store, broken);

    let thread_id = engine.start_session("Hello").await.unwrap();
    let err = engine.process_thread(thread_id).await.unwrap_err();
    assert!(err.to_string().contains("rate limited"));

    let stream = StreamName::for_thread(thread_id);
    let events = stream_events(&store, &stream).await;
    assert_eq!(
        kinds(&events),
        vec![
            kind::SESSION_STARTED,
            kind::USER_MESSAGE_ADDED,
            kind::LLM_CALL_FAILED,
        ]
    );
    match events[2].body() {
        EventBody::LlmCallFailed(p) => {
            assert_eq!(p.retry_count, 2);
            assert!(p.error_message.contains("rate limited"));
        }
        other => panic!("expected LLMCallFailed, got {:?}", other),
    }
    assert_eq!(next_step(&events), NextStep::LlmCall);

    // A healthy adapter picks the session back up.
    let recovered = engine_on(&store, MockLlm::from_script(vec![Ok(MockLlm::text_response("Hi!"))]));
    let state = recovered.process_thread(thread_id).await.unwrap();
    assert_eq!(state.llm_responses, 1);
    let events = stream_events(&store, &stream).await;
    assert_eq!(events.last().map(|e| e.kind.as_str()), Some(kind::LLM_RESPONSE_RECEIVED));
    assert_eq!(next_step(&events), NextStep::Termination);
}

/// Iteration cap: a model that always wants another tool call is cut off
/// after max_iterations steps with SessionCompleted{timeout}.
#[tokio::test]
async fn iteration_cap_completes_with_timeout() {
    let store = Arc::new(InMemoryEventStore::new());
    let relentless = MockLlm::from_script(vec![]).with_fallback(MockLlm::tool_response(vec![
        MockLlm::call_named("call-1", "get_current_time"),
    ]));
    let engine = engine_on(&store, relentless).with_max_iterations(3);

    let thread_id = engine.start_session("loop forever").await.unwrap();
    let err = engine.process_thread(thread_id).await.unwrap_err();
    assert!(err.to_string().contains("3 iterations"));

    let events = stream_events(&store, &StreamName::for_thread(thread_id)).await;
    match events.last().map(|e| e.body()) {
        Some(EventBody::SessionCompleted(p)) => {
            assert_eq!(p.completion_reason, CompletionReason::Timeout);
        }
        other => panic!("expected SessionCompleted(timeout), got {:?}", other),
    }
    assert_eq!(next_step(&events), NextStep::Termination);
    assert_contiguous_positions(&events);
}

/// Concurrency: a second writer with a stale expected version is rejected
/// while the winner's event lands.
#[tokio::test]
async fn stale_writer_is_rejected() {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = engine_on(&store, MockLlm::reply("unused"));
    let thread_id = engine.start_session("Hello").await.unwrap();
    let stream = StreamName::for_thread(thread_id);

    let body = EventBody::SessionTerminationRequested(Default::default());
    let head = stream_events(&store, &stream).await.last().unwrap().position as i64;
    let first = store
        .append(&stream, &body, &Default::default(), head)
        .await;
    let second = store
        .append(&stream, &body, &Default::default(), head)
        .await;
    assert!(first.is_ok());
    assert!(second.unwrap_err().is_conflict());
}

/// A fresh stream must be created with expected_version = -1 exactly once.
#[tokio::test]
async fn session_streams_are_created_once() {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = engine_on(&store, MockLlm::reply("unused"));
    let thread_id = engine.start_session("Hello").await.unwrap();
    let stream = StreamName::for_thread(thread_id);

    let body = EventBody::SessionTerminationRequested(Default::default());
    let err = store
        .append(&stream, &body, &Default::default(), NO_STREAM)
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

/// Multi-turn conversation: a second user message reactivates processing on
/// the same stream.
#[tokio::test]
async fn second_turn_continues_the_stream() {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = engine_on(
        &store,
        MockLlm::from_script(vec![
            Ok(MockLlm::text_response("Hi!")),
            Ok(MockLlm::text_response("Still here.")),
        ]),
    );

    let thread_id = engine.start_session("Hello").await.unwrap();
    engine.process_thread(thread_id).await.unwrap();
    engine.add_user_message(thread_id, "Are you there?").await.unwrap();
    let state = engine.process_thread(thread_id).await.unwrap();

    assert_eq!(state.user_messages, 2);
    assert_eq!(state.llm_responses, 2);
    let events = stream_events(&store, &StreamName::for_thread(thread_id)).await;
    assert_contiguous_positions(&events);
    assert_eq!(next_step(&events), NextStep::Termination);
}
