//! sql_executor tool: runs caller-supplied SQL after the SQL gate has passed it.

use askdb_core::{
    required_str, ContextStore, ContextUpdate, PipelineError, QueryExecutor, Tool, ToolError,
    ToolGate, TurnContext,
};
use std::sync::Arc;
use std::time::Duration;

const TOOL_NAME: &str = "sql_executor";

pub struct SqlExecutor {
    executor: Arc<dyn QueryExecutor>,
    contexts: Arc<dyn ContextStore>,
    timeout: Duration,
}

impl SqlExecutor {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        contexts: Arc<dyn ContextStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            contexts,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SqlExecutor {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Execute a read-only SQL query and return its rows."
    }

    fn parameter_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string", "description": "A single SELECT statement" }
            },
            "required": ["sql"]
        })
    }

    fn gate(&self) -> ToolGate {
        ToolGate::Sql("sql")
    }

    async fn invoke(
        &self,
        ctx: &TurnContext,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let sql = required_str(&params, "sql")?;
        let result = tokio::time::timeout(self.timeout, self.executor.execute(sql))
            .await
            .map_err(|_| PipelineError::Timeout {
                stage: "execution",
                timeout: self.timeout,
            })??;

        let update = ContextUpdate {
            last_sql: Some(sql.to_string()),
            last_result: Some(result.summary()),
            ..ContextUpdate::default()
        };
        if let Err(e) = self.contexts.update(ctx.resolved_user_id(), update).await {
            tracing::warn!(target: "askdb::tools", tool = TOOL_NAME, error = %e, "Context update failed");
        }

        Ok(serde_json::to_value(&result).map_err(|e| PipelineError::InternalFault(e.to_string()))?)
    }
}
