use crate::error::{RegistryError, ToolError};
use crate::shared::TurnContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which security gate screens a tool's parameters before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGate {
    /// Input Validator over the named natural-language parameter.
    NaturalLanguage(&'static str),
    /// SQL Validator over the named SQL parameter.
    Sql(&'static str),
    /// Parameters carry no free text that reaches the translator or database.
    None,
}

/// Trait implemented by every capability reachable as a structured tool call.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name for routing.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameter_schema(&self) -> serde_json::Value;

    fn gate(&self) -> ToolGate {
        ToolGate::None
    }

    async fn invoke(
        &self,
        ctx: &TurnContext,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Public view of a registered tool. Never carries the handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Name-unique registry of tools. Populated at startup, then shared read-only.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Fails with `Duplicate` instead of overwriting an existing registration.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return Err(RegistryError::Duplicate(tool.name().to_string()));
        }
        tracing::debug!(target: "askdb::tools", tool = tool.name(), "Tool registered");
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameter_schema(),
            })
            .collect()
    }

    /// Looks up and invokes the handler. Its result is returned as is: no retry, no timeout.
    pub async fn execute(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &TurnContext,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self.get(name)?;
        tool.invoke(ctx, params).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads a required string parameter.
pub fn required_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing string parameter '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echoes its parameters"
        }

        fn parameter_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        async fn invoke(
            &self,
            _ctx: &TurnContext,
            params: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            if params.get("fail").is_some() {
                return Err(ToolError::InvalidParams("asked to fail".into()));
            }
            Ok(params)
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("echo"))).unwrap();
        let err = registry.register(Arc::new(Echo("echo"))).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("echo".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(n)) if n == "nope"));
    }

    #[test]
    fn list_exposes_descriptors() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("a"))).unwrap();
        registry.register(Arc::new(Echo("b"))).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn execute_propagates_handler_outcome_unchanged() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("echo"))).unwrap();
        let ctx = TurnContext::new("u1");

        let ok = registry.execute("echo", json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(ok, json!({"x": 1}));

        let err = registry
            .execute("echo", json!({"fail": true}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(m) if m == "asked to fail"));

        let err = registry.execute("missing", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Registry(RegistryError::NotFound(_))));
    }
}
