//! Built-in tools: `get_current_time` and `echo`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::{Tool, ToolError, ToolSpec};

/// Returns the current UTC time as an ISO-8601 string. Takes no arguments.
pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_current_time".into(),
            description: Some("Get the current date and time (UTC, ISO-8601).".into()),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        Ok(Value::String(Utc::now().to_rfc3339()))
    }
}

/// Returns its `message` argument unchanged.
pub struct Echo;

#[async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "echo".into(),
            description: Some("Echo the given message back unchanged.".into()),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo back.",
                    },
                },
                "required": ["message"],
            }),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing string 'message'".into()))?;
        Ok(Value::String(message.to_string()))
    }
}
