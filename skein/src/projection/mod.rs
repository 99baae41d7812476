//! Projections: pure functions from an event sequence to derived state.
//!
//! Every projection is total and deterministic — no I/O, no wall clock — so
//! the same events always produce byte-identical results, on any reader.
//! Each one folds the stream exactly once, in position order.
//!
//! - [`llm_context`]: the chat-shaped message history for the next LLM call.
//! - [`pending_tool_calls`]: tool calls of the latest response still awaiting
//!   a completion or failure event.
//! - [`next_step`]: the step-selection state machine (last-event pattern).
//! - [`session_state`]: status and counters for one session.

mod context;
mod next_step;
mod pending;
mod session;

pub use context::{llm_context, ContextMessage};
pub use next_step::{next_step, NextStep};
pub use pending::pending_tool_calls;
pub use session::{session_state, SessionState, SessionStatus};
