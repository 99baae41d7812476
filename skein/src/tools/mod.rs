//! Tool registry and executor.
//!
//! A tool is a named callable with a JSON-schema-shaped parameter description.
//! The registry is read-only after construction and safe to share across
//! processing passes. The executor measures wall-clock duration, captures
//! every tool failure into an [`ExecutionResult`], and never propagates a
//! tool error to the caller — a failing tool becomes a failure event, not a
//! crashed engine.

mod builtin;
mod calc;

pub use builtin::{Echo, GetCurrentTime};
pub use calc::Calculate;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Tool specification sent to the LLM: name, description, and a JSON-schema
/// object describing the arguments (`type: object`, `properties`,
/// `required`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub parameters_schema: Value,
}

/// Failures surfaced by tools or the executor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    /// No tool registered under the requested name. Distinct so callers can
    /// tell a routing problem from a tool that ran and failed.
    #[error("tool not found: {0}")]
    NotFound(String),
    /// The argument object did not match what the tool expects.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The tool ran and failed.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    /// `"<kind>: <message>"` rendering for failure events.
    fn describe(&self) -> String {
        match self {
            ToolError::NotFound(name) => format!("ToolNotFound: {}", name),
            ToolError::InvalidArguments(msg) => format!("InvalidArguments: {}", msg),
            ToolError::Execution(msg) => format!("ExecutionFailed: {}", msg),
        }
    }
}

/// A single tool callable by the engine on the model's behalf.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// Specification shown to the LLM.
    fn spec(&self) -> ToolSpec;

    /// Executes with the given argument object. Arguments are not validated
    /// against the schema before the call; tools check what they need.
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Raised when two tools claim the same name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("tool already registered: {0}")]
pub struct DuplicateToolError(pub String);

/// Named tools, unique by name. Built once, then only read.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in tools (`get_current_time`, `echo`,
    /// `calculate`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in [
            Arc::new(GetCurrentTime) as Arc<dyn Tool>,
            Arc::new(Echo),
            Arc::new(Calculate),
        ] {
            registry
                .register(tool)
                .expect("builtin tool names are unique");
        }
        registry
    }

    /// Registers a tool; re-registering a name is an error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), DuplicateToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(DuplicateToolError(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Specs of all registered tools, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Outcome of one tool execution, success or failure.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub tool_name: String,
}

/// Executes `tool_name` with `args` against the registry.
///
/// Unknown names fail with `ToolNotFound` (zero duration — nothing ran).
/// For known tools the call duration is measured on a monotonic clock and
/// any error is captured as `"<kind>: <message>"`; this function itself
/// never fails.
pub async fn execute(tool_name: &str, args: Value, registry: &ToolRegistry) -> ExecutionResult {
    let Some(tool) = registry.get(tool_name) else {
        return ExecutionResult {
            success: false,
            result: None,
            error: Some(ToolError::NotFound(tool_name.to_string()).describe()),
            execution_time_ms: 0,
            tool_name: tool_name.to_string(),
        };
    };

    let started = Instant::now();
    let outcome = tool.call(args).await;
    let execution_time_ms = started.elapsed().as_millis() as u64;
    debug!(
        tool = tool_name,
        ok = outcome.is_ok(),
        execution_time_ms,
        "tool executed"
    );

    match outcome {
        Ok(result) => ExecutionResult {
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
            tool_name: tool_name.to_string(),
        },
        Err(error) => ExecutionResult {
            success: false,
            result: None,
            error: Some(error.describe()),
            execution_time_ms,
            tool_name: tool_name.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Boom;

    #[async_trait]
    impl Tool for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "boom".into(),
                description: Some("always fails".into()),
                parameters_schema: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": [],
                }),
            }
        }

        async fn call(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::Execution("kaboom".into()))
        }
    }

    /// **Scenario**: registering the same name twice is an error.
    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Boom)).unwrap();
        let err = registry.register(Arc::new(Boom)).unwrap_err();
        assert_eq!(err, DuplicateToolError("boom".into()));
        assert_eq!(registry.len(), 1);
    }

    /// **Scenario**: the builtin registry carries the three reference tools,
    /// with specs in name order.
    #[test]
    fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["calculate", "echo", "get_current_time"]);
        assert!(!registry.is_empty());
    }

    /// **Scenario**: unknown tool names produce a ToolNotFound failure result,
    /// not a panic or an Err.
    #[tokio::test]
    async fn unknown_tool_is_a_failure_result() {
        let registry = ToolRegistry::with_builtins();
        let result = execute("no_such_tool", serde_json::json!({}), &registry).await;
        assert!(!result.success);
        assert_eq!(result.tool_name, "no_such_tool");
        assert_eq!(result.error.as_deref(), Some("ToolNotFound: no_such_tool"));
        assert_eq!(result.execution_time_ms, 0);
        assert_eq!(result.result, None);
    }

    /// **Scenario**: a tool error is captured as "<kind>: <message>" with the
    /// executor still returning normally.
    #[tokio::test]
    async fn tool_failure_is_captured() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Boom)).unwrap();
        let result = execute("boom", serde_json::json!({}), &registry).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("ExecutionFailed: kaboom"));
    }

    /// **Scenario**: a successful call reports its result and a measured
    /// duration.
    #[tokio::test]
    async fn success_reports_result_and_duration() {
        let registry = ToolRegistry::with_builtins();
        let result = execute(
            "echo",
            serde_json::json!({"message": "hello"}),
            &registry,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.result, Some(serde_json::json!("hello")));
        assert_eq!(result.error, None);
        assert_eq!(result.tool_name, "echo");
    }
}
