//! LLM adapter contract: one provider-neutral call.
//!
//! An adapter accepts the projected conversation context, optional tool
//! declarations, and an optional system prompt, and returns a normalized
//! [`LlmResponse`]. Two provider families are supported: chat-style APIs
//! that interleave user/assistant/tool turns ([`OpenAiChat`]) and
//! function-calling APIs that separate tool-use blocks from text
//! ([`AnthropicMessages`]). [`adapter_for_model`] picks one by model-name
//! prefix. Token-by-token streaming is deliberately absent: adapters return
//! completed responses, and UIs stream by consuming the log after the event
//! is appended.

mod anthropic;
mod mock;
mod openai;

pub use anthropic::AnthropicMessages;
pub use mock::MockLlm;
pub use openai::OpenAiChat;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::{TokenUsage, ToolCall};
use crate::projection::ContextMessage;
use crate::tools::ToolSpec;

/// Normalized response from one LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Assistant text; may be empty when the model only requests tools.
    pub response_text: String,
    /// Tool invocations requested this turn; empty means the turn is final.
    pub tool_calls: Vec<ToolCall>,
    /// Model that actually served the call (as reported by the provider).
    pub model_name: String,
    pub token_usage: TokenUsage,
}

/// LLM failure taxonomy. `Api` and `MalformedResponse` are retriable within
/// the engine's budget; `Other` is not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// Network, authentication, or rate-limit failure talking to the provider.
    #[error("llm api error: {0}")]
    Api(String),
    /// The provider answered, but the payload does not fit its own schema
    /// (or carries neither text nor tool calls).
    #[error("malformed llm response: {0}")]
    MalformedResponse(String),
    /// Anything else; not retried.
    #[error("llm error: {0}")]
    Other(String),
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, LlmError::Api(_) | LlmError::MalformedResponse(_))
    }
}

/// Provider-neutral LLM client.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// The configured model name (factory input, not the per-response name).
    fn model_name(&self) -> &str;

    /// One completed call. `tools` is `None` when the registry is empty so
    /// providers that treat "empty tools" as an error never see it.
    async fn call(
        &self,
        messages: &[ContextMessage],
        tools: Option<&[ToolSpec]>,
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, LlmError>;
}

/// Selects an adapter by model-name prefix: `claude-*` goes to the Messages
/// API adapter, everything else to the OpenAI-compatible chat adapter.
/// Credentials are ambient (`ANTHROPIC_API_KEY` / `OPENAI_API_KEY`).
pub fn adapter_for_model(model: &str) -> Result<Box<dyn LlmAdapter>, LlmError> {
    if model.starts_with("claude-") {
        Ok(Box::new(AnthropicMessages::new(model)?))
    } else {
        Ok(Box::new(OpenAiChat::new(model)?))
    }
}
