//! context_manager tool: read and modify the caller's conversation context.

use askdb_core::{required_str, ContextStore, ContextUpdate, PipelineError, Tool, ToolError, TurnContext};
use serde_json::json;
use std::sync::Arc;

const TOOL_NAME: &str = "context_manager";

pub struct ContextManager {
    contexts: Arc<dyn ContextStore>,
}

impl ContextManager {
    pub fn new(contexts: Arc<dyn ContextStore>) -> Self {
        Self { contexts }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value).map_err(|e| PipelineError::InternalFault(e.to_string()).into())
}

#[async_trait::async_trait]
impl Tool for ContextManager {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Get, update or clear the conversation context, and store or recall long-term memories."
    }

    fn parameter_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["get", "update", "clear", "add_memory", "get_memories"]
                },
                "updates": { "type": "object", "description": "Partial context for action=update" },
                "content": { "type": "string", "description": "Memory text for action=add_memory" },
                "metadata": { "type": "object" }
            },
            "required": ["action"]
        })
    }

    async fn invoke(
        &self,
        ctx: &TurnContext,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let user_id = ctx.resolved_user_id();
        match required_str(&params, "action")? {
            "get" => to_json(&self.contexts.get(user_id).await?),
            "update" => {
                let updates = params.get("updates").cloned().unwrap_or_else(|| json!({}));
                let update: ContextUpdate = serde_json::from_value(updates)
                    .map_err(|e| ToolError::InvalidParams(format!("invalid updates: {}", e)))?;
                to_json(&self.contexts.update(user_id, update).await?)
            }
            "clear" => {
                self.contexts.clear(user_id).await?;
                Ok(json!({ "status": "cleared", "user_id": user_id }))
            }
            "add_memory" => {
                let content = required_str(&params, "content")?;
                let block = self
                    .contexts
                    .add_memory(user_id, content, params.get("metadata").cloned())
                    .await?;
                to_json(&block)
            }
            "get_memories" => to_json(&self.contexts.memories(user_id).await?),
            other => Err(ToolError::InvalidParams(format!("unknown action '{}'", other))),
        }
    }
}
