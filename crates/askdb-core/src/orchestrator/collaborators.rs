//! Interfaces of the external collaborators the pipeline awaits: translator, executor, exporter.

use crate::context::{ChatMessage, ConversationContext, ResultSummary};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Number of trailing history messages handed to the translator.
const PROMPT_MESSAGE_WINDOW: usize = 6;

/// Short-term context supplied with each translation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationContext {
    pub last_query: Option<String>,
    pub last_sql: Option<String>,
    pub last_result_summary: Option<String>,
    #[serde(default)]
    pub recent_messages: Vec<ChatMessage>,
}

impl TranslationContext {
    pub fn from_context(ctx: &ConversationContext) -> Self {
        let start = ctx.message_history.len().saturating_sub(PROMPT_MESSAGE_WINDOW);
        Self {
            last_query: ctx.last_query.clone(),
            last_sql: ctx.last_sql.clone(),
            last_result_summary: ctx.last_result.as_ref().map(ResultSummary::as_prompt_line),
            recent_messages: ctx.message_history[start..].to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_query.is_none()
            && self.last_sql.is_none()
            && self.last_result_summary.is_none()
            && self.recent_messages.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    /// `None` when the model could not produce SQL for the question.
    #[serde(default, alias = "sqlQuery")]
    pub sql_query: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub intent: String,
}

/// NL→SQL translation (language model).
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        context: &TranslationContext,
    ) -> Result<Translation, PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
    pub fields: Vec<FieldInfo>,
}

impl QueryResult {
    /// Builds a result from JSON-object rows, deriving field info from the first row.
    pub fn from_rows(rows: Vec<serde_json::Value>) -> Self {
        let fields = rows
            .first()
            .and_then(|r| r.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(name, value)| FieldInfo {
                        name: name.clone(),
                        data_type: json_kind(value).to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            row_count: rows.len(),
            rows,
            fields,
        }
    }

    /// Row count plus a short text kept as short-term context.
    pub fn summary(&self) -> ResultSummary {
        let summary = if self.fields.is_empty() {
            format!("{} row(s)", self.row_count)
        } else {
            let names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
            format!("{} row(s) with columns {}", self.row_count, names.join(", "))
        };
        ResultSummary {
            row_count: self.row_count,
            summary,
        }
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_f64() => "numeric",
        serde_json::Value::Number(_) => "integer",
        serde_json::Value::String(_) => "text",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "json",
    }
}

/// Executes validated, read-only SQL.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Created,
    Appended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub file_action: FileAction,
    pub script_path: String,
}

/// Saves SQL into a script file for an external editor.
#[async_trait::async_trait]
pub trait ScriptExporter: Send + Sync {
    async fn export(
        &self,
        sql: &str,
        script_name: Option<&str>,
    ) -> Result<ExportOutcome, PipelineError>;
}
