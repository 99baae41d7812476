//! Function-calling adapter for the Anthropic Messages API.
//!
//! The Messages API differs from chat-style endpoints in three ways this
//! adapter normalizes away: the system prompt is a top-level field, assistant
//! turns are content-block arrays separating `text` from `tool_use`, and tool
//! results travel as `tool_result` blocks inside a user message.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::event::{TokenUsage, ToolCall};
use crate::projection::ContextMessage;
use crate::tools::ToolSpec;

use super::{LlmAdapter, LlmError, LlmResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u64 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Anthropic Messages API client.
pub struct AnthropicMessages {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl AnthropicMessages {
    /// Builds a client for the given model. Reads `ANTHROPIC_API_KEY` and
    /// optional `ANTHROPIC_BASE_URL` from the environment.
    pub fn new(model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Other(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            model: model.into(),
            base_url: std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
        })
    }

    /// Override the API key (instead of `ANTHROPIC_API_KEY`).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the endpoint base URL (instead of `ANTHROPIC_BASE_URL`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn build_body(
        &self,
        messages: &[ContextMessage],
        tools: Option<&[ToolSpec]>,
        system_prompt: Option<&str>,
    ) -> Value {
        let api_messages: Vec<Value> = messages.iter().map(message_to_anthropic).collect();
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": api_messages,
        });
        if let Some(prompt) = system_prompt {
            body["system"] = Value::String(prompt.to_string());
        }
        if let Some(tools) = tools {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "input_schema": spec.parameters_schema,
                    })
                })
                .collect();
            body["tools"] = Value::Array(declarations);
        }
        body
    }
}

fn message_to_anthropic(message: &ContextMessage) -> Value {
    match message {
        ContextMessage::User { content } => json!({"role": "user", "content": content}),
        ContextMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut blocks: Vec<Value> = Vec::new();
            if !content.is_empty() {
                blocks.push(json!({"type": "text", "text": content}));
            }
            for call in tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        // Tool results are user-side tool_result blocks.
        ContextMessage::Tool {
            content,
            tool_call_id,
        } => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_call_id.clone().unwrap_or_default(),
                "content": content,
            }],
        }),
    }
}

fn parse_response(body: &Value, fallback_model: &str) -> Result<LlmResponse, LlmError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::MalformedResponse("no content blocks".into()))?;

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(text);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        LlmError::MalformedResponse("tool_use block without name".into())
                    })?
                    .to_string();
                let arguments = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            _ => {}
        }
    }

    let response_text = text_parts.join("\n");
    if response_text.is_empty() && tool_calls.is_empty() {
        return Err(LlmError::MalformedResponse(
            "response carries neither text nor tool calls".into(),
        ));
    }

    let usage = body.get("usage");
    let input = usage
        .and_then(|u| u.get("input_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output = usage
        .and_then(|u| u.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let model_name = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_model)
        .to_string();

    Ok(LlmResponse {
        response_text,
        tool_calls,
        model_name,
        token_usage: TokenUsage {
            input,
            output,
            total: input + output,
        },
    })
}

#[async_trait]
impl LlmAdapter for AnthropicMessages {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn call(
        &self,
        messages: &[ContextMessage],
        tools: Option<&[ToolSpec]>,
        system_prompt: Option<&str>,
    ) -> Result<LlmResponse, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Api("ANTHROPIC_API_KEY is not set".into()))?;

        let url = self.messages_url();
        let body = self.build_body(messages, tools, system_prompt);
        debug!(
            url = %url,
            model = %self.model,
            message_count = messages.len(),
            tools_count = tools.map(<[ToolSpec]>::len).unwrap_or(0),
            "messages request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Api(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Api(format!("reading response body: {}", e)))?;
        if !status.is_success() {
            return Err(LlmError::Api(format!("HTTP {}: {}", status, text)));
        }
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::MalformedResponse(format!("response is not JSON: {}", e)))?;
        parse_response(&parsed, &self.model)
    }
}
