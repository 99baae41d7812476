//! Chat-style adapter for OpenAI-compatible endpoints.
//!
//! Speaks the chat completions wire format: the conversation is a flat list
//! of `system`/`user`/`assistant`/`tool` messages, tool declarations ride as
//! `tools[].function`, and tool results reference their call via
//! `tool_call_id`. Works against OpenAI itself and the many compatible
//! servers (set `OPENAI_BASE_URL` to point elsewhere).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::event::{TokenUsage, ToolCall};
use crate::projection::ContextMessage;
use crate::tools::ToolSpec;

use super::{LlmAdapter, LlmError, LlmResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenAI-compatible chat completions client.
pub struct OpenAiChat {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChat {
    /// Builds a client for the given model. Reads `OPENAI_API_KEY` and
    /// optional `OPENAI_BASE_URL` from the environment.
    pub fn new(model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Other(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            model: model.into(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })
    }

    /// Override the API key (instead of `OPENAI_API_KEY`).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the endpoint base URL (instead of `OPENAI_BASE_URL`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Endpoint URL; does not double the `/v1` when the base already has it.
    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn build_body(
        &self,
        messages: &[ContextMessage],
        tools: Option<&[ToolSpec]>,
        system_prompt: Option<&str>,
    ) -> Value {
        let mut api_messages: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = system_prompt {
            api_messages.push(json!({"role": "system", "content": prompt}));
        }
        for message in messages {
            api_messages.push(message_to_openai(message));
        }

        let mut body = json!({
            "model": self.model,
            "messages": api_messages,
        });
        if let Some(tools) = tools {
            let declarations: Vec<Value> = tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(declarations);
        }
        body
    }
}

fn message_to_openai(message: &ContextMessage) -> Value {
    match message {
        ContextMessage::User { content } => json!({"role": "user", "content": content}),
        ContextMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut obj = json!({"role": "assistant"});
            obj["content"] = if content.is_empty() {
                Value::Null
            } else {
                Value::String(content.clone())
            };
            if !tool_calls.is_empty() {
                // Chat completions carry tool arguments as a JSON string.
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                obj["tool_calls"] = Value::Array(calls);
            }
            obj
        }
        ContextMessage::Tool {
            content,
            tool_call_id,
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id.clone().unwrap_or_default(),
            "content": content,
        }),
    }
}

fn tool_to_openai(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters_schema,
        }
    })
}

fn parse_response(body: &Value, fallback_model: &str) -> Result<LlmResponse, LlmError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| LlmError::MalformedResponse("no choices[0].message".into()))?;

    let response_text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();

    if response_text.is_empty() && tool_calls.is_empty() {
        return Err(LlmError::MalformedResponse(
            "response carries neither text nor tool calls".into(),
        ));
    }

    let usage = body.get("usage");
    let token_usage = TokenUsage {
        input: read_u64(usage, "prompt_tokens"),
        output: read_u64(usage, "completion_tokens"),
        total: read_u64(usage, "total_tokens"),
    };
    let model_name = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or(fallback_model)
        .to_string();

    Ok(LlmResponse {
        response_text,
        tool_calls,
        model_name,
        token_usage,
    })
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments_raw = function
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("");
    let arguments = if arguments_raw.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(arguments_raw).unwrap_or_else(|e| {
            warn!(error = %e, arguments = %arguments_raw, "tool arguments are not JSON, using empty object");
            json!({})
        })
    };
    Some(ToolCall {
        id,
        name,
        arguments,
    })
}

fn read_u64(usage: Option<&Value>, key: &str) -> u64 {
    usage
        .and_then(|u| u.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

#[async_trait]
impl LlmAdapter for OpenAiChat {
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
            .ok_or_else(|| LlmError::Api("OPENAI_API_KEY is not set".into()))?;

        let url = self.chat_completions_url();
        let body = self.build_body(messages, tools, system_prompt);
        debug!(
            url = %url,
            model = %self.model,
            message_count = messages.len(),
            tools_count = tools.map(<[ToolSpec]>::len).unwrap_or(0),
            "chat completions request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
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
