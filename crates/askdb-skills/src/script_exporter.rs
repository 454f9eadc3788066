//! script_exporter tool: saves SQL to a script file.

use askdb_core::{required_str, PipelineError, ScriptExporter, Tool, ToolError, ToolGate, TurnContext};
use std::sync::Arc;

const TOOL_NAME: &str = "script_exporter";

pub struct ScriptExport {
    exporter: Arc<dyn ScriptExporter>,
}

impl ScriptExport {
    pub fn new(exporter: Arc<dyn ScriptExporter>) -> Self {
        Self { exporter }
    }
}

#[async_trait::async_trait]
impl Tool for ScriptExport {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Save a SQL query to a .sql script file (created on first use, appended afterwards)."
    }

    fn parameter_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sql": { "type": "string" },
                "script_name": { "type": "string", "description": "File name without extension" }
            },
            "required": ["sql"]
        })
    }

    fn gate(&self) -> ToolGate {
        ToolGate::Sql("sql")
    }

    async fn invoke(
        &self,
        _ctx: &TurnContext,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let sql = required_str(&params, "sql")?;
        let script_name = params.get("script_name").and_then(|v| v.as_str());
        let outcome = self.exporter.export(sql, script_name).await?;
        Ok(serde_json::to_value(&outcome).map_err(|e| PipelineError::InternalFault(e.to_string()))?)
    }
}
