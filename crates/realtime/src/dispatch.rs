//! Function-call dispatch.
//!
//! The registry owns the tool declarations advertised in `session.update` and
//! routes completed function calls to their handlers. Handler failures are
//! converted into result strings so the model always receives a
//! `function_call_output` for every call it issues.

use crate::events::ToolDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A callable tool exposed to the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with the parsed call arguments. The returned string
    /// is forwarded verbatim as the function-call output.
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<String>> + Send,
{
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<String> {
        self(args).await
    }
}

/// Registered tools, keyed by name. Later registrations replace earlier ones.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its declared name.
    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        if self
            .tools
            .insert(
                definition.name.clone(),
                RegisteredTool {
                    definition,
                    handler,
                },
            )
            .is_some()
        {
            warn!("replaced existing tool registration");
        }
    }

    /// Tool declarations in registration-independent order, for
    /// `session.update`.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invokes a tool by name. Never fails: an unknown name or a failing
    /// handler produces a describing result string, which flows back to the
    /// model like any other output.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "model called an unregistered tool");
            return format!("Unknown tool: {name}");
        };
        info!(tool = name, "executing tool");
        match tool.handler.call(args).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = name, error = %e, "tool handler failed");
                format!("Tool execution error: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_definition(name: &str) -> ToolDefinition {
        ToolDefinition::function(
            name,
            "Echo the input back",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        )
    }

    #[tokio::test]
    async fn invokes_registered_handler_with_args() {
        let mut registry = ToolRegistry::new();
        registry.register(
            echo_definition("echo"),
            Arc::new(|args: serde_json::Value| async move {
                Ok::<_, anyhow::Error>(args["text"].as_str().unwrap_or("").to_string())
            }),
        );
        let output = registry.invoke("echo", json!({"text": "hello"})).await;
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn unknown_tool_yields_result_string() {
        let registry = ToolRegistry::new();
        let output = registry.invoke("missing", json!({})).await;
        assert_eq!(output, "Unknown tool: missing");
    }

    #[tokio::test]
    async fn failing_handler_yields_result_string() {
        let mut registry = ToolRegistry::new();
        registry.register(
            echo_definition("boom"),
            Arc::new(|_: serde_json::Value| async move {
                anyhow::bail!("database unreachable")
            }),
        );
        let output = registry.invoke("boom", json!({})).await;
        assert_eq!(output, "Tool execution error: database unreachable");
    }

    #[tokio::test]
    async fn later_registration_replaces_earlier() {
        let mut registry = ToolRegistry::new();
        registry.register(
            echo_definition("echo"),
            Arc::new(|_: serde_json::Value| async move {
                Ok::<_, anyhow::Error>("first".to_string())
            }),
        );
        registry.register(
            echo_definition("echo"),
            Arc::new(|_: serde_json::Value| async move {
                Ok::<_, anyhow::Error>("second".to_string())
            }),
        );
        assert_eq!(registry.definitions().len(), 1);
        assert_eq!(registry.invoke("echo", json!({})).await, "second");
    }

    #[test]
    fn is_empty_reflects_registrations() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(
            echo_definition("echo"),
            Arc::new(|_: serde_json::Value| async move {
                Ok::<_, anyhow::Error>(String::new())
            }),
        );
        assert!(!registry.is_empty());
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        let handler =
            Arc::new(|_: serde_json::Value| async move { Ok::<_, anyhow::Error>(String::new()) });
        registry.register(echo_definition("zeta"), handler.clone());
        registry.register(echo_definition("alpha"), handler);
        let names: Vec<_> = registry.definitions().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
