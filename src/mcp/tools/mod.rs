//! Tool registry and invoker.
//!
//! Tools are registered once at startup through [`ToolRegistryBuilder`]: a
//! descriptor (name, description, input schema) plus the adapter that runs
//! it. The built [`ToolRegistry`] is immutable and shared by every session.
//!
//! # Error layers
//!
//! [`ToolRegistry::call`] separates two kinds of failure:
//!
//! - Protocol-level: unknown tool or arguments that do not satisfy the
//!   schema. Returned as [`CallError`] and answered with a JSON-RPC error.
//! - Business-level: the adapter failed, panicked or timed out. Returned as
//!   a [`ToolCallResult`] with `is_error` set, inside a successful response.

pub mod knowledge;
pub mod schema;
pub mod system;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::ServiceError;
use crate::services::Services;

/// A tool definition for the `tools/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates a successful result holding pretty-printed JSON.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Text of the first content item.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|ToolContent::Text { text }| text.as_str())
    }
}

/// Future returned by a tool adapter.
pub type ToolFuture = BoxFuture<'static, Result<ToolCallResult, ServiceError>>;

/// Decodes arguments and starts the adapter.
type ErasedHandler = Arc<dyn Fn(Value) -> Result<ToolFuture, serde_json::Error> + Send + Sync>;

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: ErasedHandler,
}

/// Protocol-level failures of [`ToolRegistry::call`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No tool with that name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not satisfy the tool's input schema.
    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// What was wrong.
        message: String,
    },
}

/// Registration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two tools share a name.
    #[error("tool registered twice: {0}")]
    DuplicateTool(String),
}

/// Collects tool registrations.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: IndexMap<String, RegisteredTool>,
    duplicate: Option<String>,
}

impl ToolRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// Arguments are validated against the descriptor's schema and then
    /// decoded into `A` before `handler` runs.
    #[must_use]
    pub fn tool<A, F, Fut>(mut self, descriptor: ToolDescriptor, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolCallResult, ServiceError>> + Send + 'static,
    {
        let handler: ErasedHandler = Arc::new(move |arguments: Value| {
            let arguments: A = serde_json::from_value(arguments)?;
            Ok(handler(arguments).boxed())
        });

        let name = descriptor.name.clone();
        if self
            .tools
            .insert(
                name.clone(),
                RegisteredTool {
                    descriptor,
                    handler,
                },
            )
            .is_some()
            && self.duplicate.is_none()
        {
            self.duplicate = Some(name);
        }
        self
    }

    /// Finishes registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if a name was registered twice.
    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        if let Some(name) = self.duplicate {
            return Err(RegistryError::DuplicateTool(name));
        }
        Ok(ToolRegistry { tools: self.tools })
    }
}

/// Immutable set of registered tools, in registration order.
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Starts a new registration.
    #[must_use]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// The full tool set backed by `services`.
    ///
    /// # Errors
    ///
    /// Returns an error if two adapters share a name.
    pub fn with_services(services: &Services) -> Result<Self, RegistryError> {
        let builder = knowledge::register(Self::builder(), services);
        system::register(builder, services).build()
    }

    /// Descriptors in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validates arguments and runs a tool with a timeout.
    ///
    /// The adapter runs on its own task. On timeout the task is aborted and an
    /// error result is returned; adapter errors and panics are also turned
    /// into error results.
    ///
    /// # Errors
    ///
    /// Returns [`CallError`] for unknown tools and invalid arguments.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult, CallError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| CallError::UnknownTool(name.to_string()))?;

        let arguments = if arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            arguments
        };

        let invalid = |message: String| CallError::InvalidArguments {
            tool: name.to_string(),
            message,
        };
        schema::validate(&tool.descriptor.input_schema, &arguments).map_err(invalid)?;
        let future = (tool.handler)(arguments).map_err(|e| invalid(e.to_string()))?;

        let task = tokio::spawn(future);
        let abort = task.abort_handle();

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!(tool = name, error = %e, "Tool failed");
                ToolCallResult::error(format!("Tool '{name}' failed: {e}"))
            }
            Ok(Err(e)) => {
                error!(tool = name, error = %e, "Tool task panicked");
                ToolCallResult::error(format!("Tool '{name}' failed unexpectedly"))
            }
            Err(_) => {
                abort.abort();
                warn!(tool = name, timeout_ms = timeout.as_millis(), "Tool timed out");
                ToolCallResult::error(format!(
                    "Tool '{name}' timed out after {} ms",
                    timeout.as_millis()
                ))
            }
        };
        Ok(result)
    }
}

/// Arguments of tools that take none. Extra fields are ignored.
#[derive(Debug, Default, serde::Deserialize)]
pub struct NoArguments {}

/// Schema for tools without arguments.
#[must_use]
pub fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct EchoArgs {
        message: String,
        #[serde(default)]
        delay_ms: u64,
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::builder()
            .tool(
                ToolDescriptor::new(
                    "echo",
                    "Echo a message",
                    json!({
                        "type": "object",
                        "properties": {
                            "message": { "type": "string" },
                            "delay_ms": { "type": "integer", "minimum": 0 }
                        },
                        "required": ["message"]
                    }),
                ),
                |args: EchoArgs| async move {
                    tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
                    Ok(ToolCallResult::text(args.message))
                },
            )
            .tool(
                ToolDescriptor::new("fail", "Always fails", empty_schema()),
                |_: NoArguments| async {
                    Err(ServiceError::unavailable("search", "connection refused"))
                },
            )
            .tool(
                ToolDescriptor::new("panic", "Always panics", empty_schema()),
                |_: NoArguments| async { panic!("adapter bug") },
            )
            .build()
            .unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn list_preserves_registration_order() {
        let registry = registry();
        let names: Vec<&str> = registry.list().into_iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "fail", "panic"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = ToolRegistry::builder()
            .tool(
                ToolDescriptor::new("a", "", empty_schema()),
                |_: NoArguments| async { Ok::<_, ServiceError>(ToolCallResult::text("1")) },
            )
            .tool(
                ToolDescriptor::new("a", "", empty_schema()),
                |_: NoArguments| async { Ok::<_, ServiceError>(ToolCallResult::text("2")) },
            )
            .build();
        assert_eq!(result.err(), Some(RegistryError::DuplicateTool("a".to_string())));
    }

    #[tokio::test]
    async fn call_success() {
        let result = registry()
            .call("echo", json!({ "message": "hi" }), TIMEOUT)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_protocol_error() {
        let err = registry().call("nope", json!({}), TIMEOUT).await.unwrap_err();
        assert_eq!(err, CallError::UnknownTool("nope".to_string()));
    }

    #[tokio::test]
    async fn invalid_arguments_are_protocol_errors() {
        let err = registry().call("echo", json!({}), TIMEOUT).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidArguments { .. }));

        let err = registry()
            .call("echo", json!({ "message": 1 }), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn null_arguments_mean_empty_object() {
        let err = registry().call("echo", Value::Null, TIMEOUT).await.unwrap_err();
        assert!(err.to_string().contains("missing required field 'message'"));
    }

    #[tokio::test]
    async fn adapter_failure_is_business_error() {
        let result = registry().call("fail", json!({}), TIMEOUT).await.unwrap();
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn adapter_panic_is_business_error() {
        let result = registry().call("panic", json!({}), TIMEOUT).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn timeout_is_business_error() {
        let result = registry()
            .call(
                "echo",
                json!({ "message": "late", "delay_ms": 1_000 }),
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("timed out"));
    }

    #[test]
    fn serialise_result_always_carries_is_error() {
        let json = serde_json::to_string(&ToolCallResult::text("ok")).unwrap();
        assert!(json.contains(r#""isError":false"#));
        assert!(json.contains(r#""type":"text""#));
    }

    #[test]
    fn serialise_descriptor_uses_camel_case() {
        let json = serde_json::to_value(ToolDescriptor::new("t", "d", empty_schema())).unwrap();
        assert!(json.get("inputSchema").is_some());
    }
}
