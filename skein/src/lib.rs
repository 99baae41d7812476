//! # Skein
//!
//! Event-sourced execution of ReAct-style LLM agents. One agent session is one
//! append-only stream in the message log; the stream is the only authoritative
//! state. A stateless [`ProcessingEngine`] repeatedly reads the stream,
//! **projects** the events into derived state, decides the next step (LLM
//! call, tool execution, or termination), executes it, and appends the outcome
//! as new events.
//!
//! ## Design principles
//!
//! - **The log is the state**: anything in memory is a projection rebuilt from
//!   the stream; nothing is cached between processing passes.
//! - **Pure projections**: [`projection`] functions are total and
//!   deterministic — no I/O, no clock — so any reader reconstructs identical
//!   state from the same events.
//! - **Last-event routing**: the next step depends on the most recent event,
//!   with one tie-break (unresolved tool calls pull the machine back to tool
//!   execution).
//! - **Optimistic concurrency, no locks**: per-stream safety comes from the
//!   store's `expected_version` check at append time.
//!
//! ## Main types
//!
//! - [`StreamName`]: `category:version-threadId` stream identity.
//! - [`event::EventBody`] and [`event::Envelope`]: typed payloads under a
//!   universal envelope.
//! - [`store::EventStore`]: append/read with optimistic concurrency;
//!   [`store::InMemoryEventStore`] for tests, [`store::MessageDbStore`] for
//!   Message DB (Postgres).
//! - [`ProcessingEngine`]: session lifecycle and the step loop.
//! - [`tools::ToolRegistry`] and [`llm::LlmAdapter`]: the two effectful seams
//!   a step can reach.

pub mod engine;
pub mod event;
pub mod llm;
pub mod projection;
pub mod store;
pub mod stream;
pub mod tools;

pub use engine::{EngineError, ProcessingEngine};
pub use event::{CompletionReason, Envelope, EventBody, Metadata, TokenUsage, ToolCall};
pub use llm::{LlmAdapter, LlmError, LlmResponse, MockLlm};
pub use projection::{
    llm_context, next_step, pending_tool_calls, session_state, ContextMessage, NextStep,
    SessionState, SessionStatus,
};
pub use store::{EventStore, InMemoryEventStore, MessageDbStore, StoreError};
pub use stream::StreamName;
pub use tools::{ExecutionResult, Tool, ToolRegistry, ToolSpec};
