//! sql_generator tool: translates a question to SQL without executing it.

use askdb_core::{
    required_str, ContextStore, PipelineError, SecurityGate, Tool, ToolError, ToolGate,
    TranslationContext, Translator, TurnContext,
};
use std::sync::Arc;
use std::time::Duration;

const TOOL_NAME: &str = "sql_generator";

pub struct SqlGenerator {
    translator: Arc<dyn Translator>,
    contexts: Arc<dyn ContextStore>,
    gate: Arc<SecurityGate>,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(
        translator: Arc<dyn Translator>,
        contexts: Arc<dyn ContextStore>,
        gate: Arc<SecurityGate>,
        timeout: Duration,
    ) -> Self {
        Self {
            translator,
            contexts,
            gate,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SqlGenerator {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Translate a natural-language question into a read-only SQL query without running it."
    }

    fn parameter_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Question about the data" }
            },
            "required": ["query"]
        })
    }

    fn gate(&self) -> ToolGate {
        ToolGate::NaturalLanguage("query")
    }

    async fn invoke(
        &self,
        ctx: &TurnContext,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let query = required_str(&params, "query")?;
        let translation_context = self
            .contexts
            .get(ctx.resolved_user_id())
            .await
            .map(|c| TranslationContext::from_context(&c))
            .unwrap_or_default();

        let translation = tokio::time::timeout(
            self.timeout,
            self.translator.translate(query, &translation_context),
        )
        .await
        .map_err(|_| PipelineError::Timeout {
            stage: "translation",
            timeout: self.timeout,
        })??;

        let sql = translation
            .sql_query
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::execution("translation", "the model did not produce a SQL query for this question")
            })?;
        // Generated SQL is screened here too, so a caller never receives SQL the executor would refuse.
        let verdict = self
            .gate
            .check_sql(sql)
            .map_err(|alert| PipelineError::ValidationBlocked { alert })?;

        Ok(serde_json::json!({
            "sql_query": sql,
            "entities": translation.entities,
            "intent": translation.intent,
            "warning": verdict.warning,
        }))
    }
}
