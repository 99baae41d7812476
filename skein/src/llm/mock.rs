//! Mock LLM for tests and offline demos.
//!
//! Plays back a scripted sequence of replies/failures, one per call; an
//! optional fallback answers once the script runs out. A call with an empty
//! script and no fallback is an Api error, which exercises the engine's
//! failure path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::event::{TokenUsage, ToolCall};
use crate::projection::ContextMessage;
use crate::tools::ToolSpec;

use super::{LlmAdapter, LlmError, LlmResponse};

const MOCK_MODEL: &str = "mock-model";

/// Scripted [`LlmAdapter`].
pub struct MockLlm {
    script: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    fallback: Option<LlmResponse>,
    calls: AtomicUsize,
}

impl MockLlm {
    /// A mock that replays the given results in order.
    pub fn from_script(script: Vec<Result<LlmResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A mock that always answers with plain text (no tool calls).
    pub fn reply(text: impl Into<String>) -> Self {
        Self::from_script(vec![]).with_fallback(Self::text_response(text))
    }

    /// First call requests `tool_call`, second call answers `final_text`.
    pub fn tool_call_then_reply(tool_call: ToolCall, final_text: impl Into<String>) -> Self {
        Self::from_script(vec![
            Ok(Self::tool_response(vec![tool_call])),
            Ok(Self::text_response(final_text)),
        ])
    }

    /// Answer returned once the script is exhausted (builder).
    pub fn with_fallback(mut self, response: LlmResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Number of calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A plain-text response with fixed usage numbers.
    pub fn text_response(text: impl Into<String>) -> LlmResponse {
        LlmResponse {
            response_text: text.into(),
            tool_calls: vec![],
            model_name: MOCK_MODEL.to_string(),
            token_usage: TokenUsage {
                input: 10,
                output: 5,
                total: 15,
            },
        }
    }

    /// A tool-call-only response with fixed usage numbers.
    pub fn tool_response(tool_calls: Vec<ToolCall>) -> LlmResponse {
        LlmResponse {
            response_text: String::new(),
            tool_calls,
            model_name: MOCK_MODEL.to_string(),
            token_usage: TokenUsage {
                input: 10,
                output: 5,
                total: 15,
            },
        }
    }

    /// Convenience tool call with an empty argument object.
    pub fn call_named(id: impl Into<String>, name: impl Into<String>) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: json!({}),
        }
    }
}

#[async_trait]
impl LlmAdapter for MockLlm {
    fn model_name(&self) -> &str {
        MOCK_MODEL
    }

    async fn call(
        &self,
        _messages: &[ContextMessage],
        _tools: Option<&[ToolSpec]>,
        _system_prompt: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .expect("mock script mutex poisoned")
            .pop_front();
        match scripted {
            Some(result) => result,
            None => match &self.fallback {
                Some(response) => Ok(response.clone()),
                None => Err(LlmError::Api("mock script exhausted".into())),
            },
        }
    }
}
