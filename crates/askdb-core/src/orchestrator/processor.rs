//! Request Processor: drives one turn through the security-gated pipeline.
//!
//! ```text
//! RECEIVED ─┬─ tool calls ──► DISPATCH_TOOL_CALLS ─────────────────────────────► RESPONDED
//!           └─ text ──► VALIDATE_NL ─► TRANSLATE ─► VALIDATE_SQL ─► ASSESS_SENSITIVITY
//!                           │                           │                │
//!                           ▼                           ▼                ▼
//!                        BLOCKED                     BLOCKED          BLOCKED
//!               ─► EXECUTE ─► UPDATE_CONTEXT ─► RESPONDED     (any collaborator failure ─► ERROR)
//! ```

use super::collaborators::{QueryExecutor, QueryResult, TranslationContext, Translator};
use super::schema::SchemaQuery;
use super::tool::{required_str, ToolGate, ToolRegistry};
use crate::context::{ChatMessage, ContextStore, ContextUpdate, QueryHistoryEntry, Role};
use crate::error::{PipelineError, ToolError};
use crate::guard::{AlertSummary, SecurityAlert, SecurityGate};
use crate::shared::{now_ms, TurnContext};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);
const ALERT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Received,
    DispatchToolCalls,
    ValidateNl,
    Translate,
    ValidateSql,
    AssessSensitivity,
    Execute,
    UpdateContext,
    Responded,
    Blocked,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Ok,
    Blocked,
    Error,
}

/// One explicit, structured tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, alias = "arguments")]
    pub params: serde_json::Value,
}

/// The latest turn: either messages (the last user message is the question) or tool calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl TurnRequest {
    pub fn question(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(text)],
            tool_calls: Vec::new(),
        }
    }

    pub fn tools(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            messages: Vec::new(),
            tool_calls: calls,
        }
    }

    fn latest_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Per-call outcome of a tool dispatch. A failed call never fails its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub status: TurnStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_alert: Option<AlertSummary>,
}

impl ToolCallResult {
    fn ok(call: &ToolCallRequest, value: serde_json::Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            status: TurnStatus::Ok,
            result: Some(value),
            error: None,
            security_alert: None,
        }
    }

    fn blocked(call: &ToolCallRequest, alert: &SecurityAlert) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            status: TurnStatus::Blocked,
            result: None,
            error: Some(alert.user_message().to_string()),
            security_alert: Some(alert.summary()),
        }
    }

    fn failed(id: Option<String>, name: String, message: String) -> Self {
        Self {
            id,
            name,
            status: TurnStatus::Error,
            result: None,
            error: Some(message),
            security_alert: None,
        }
    }
}

/// Response for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: TurnStatus,
    pub final_state: TurnState,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_alert: Option<AlertSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolCallResult>,
}

impl ResponseEnvelope {
    fn new(status: TurnStatus, final_state: TurnState, message: impl Into<String>) -> Self {
        Self {
            status,
            final_state,
            message: message.into(),
            sql: None,
            entities: Vec::new(),
            intent: None,
            results: None,
            security_alert: None,
            warnings: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    fn blocked(alert: &SecurityAlert) -> Self {
        let mut envelope = Self::new(TurnStatus::Blocked, TurnState::Blocked, alert.user_message());
        envelope.security_alert = Some(alert.summary());
        envelope
    }
}

/// A security alert as published on the alert channel. Category and severity only; matched rules stay in the logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub user_id: String,
    pub alert: AlertSummary,
    pub timestamp_ms: i64,
}

/// Orchestrates turns over the gates, the collaborators, the Context Store and the Tool Registry.
pub struct RequestProcessor {
    gate: Arc<SecurityGate>,
    translator: Arc<dyn Translator>,
    executor: Arc<dyn QueryExecutor>,
    contexts: Arc<dyn ContextStore>,
    registry: Arc<ToolRegistry>,
    translate_timeout: Duration,
    execute_timeout: Duration,
    alerts: broadcast::Sender<AlertEvent>,
}

impl RequestProcessor {
    pub fn new(
        gate: Arc<SecurityGate>,
        translator: Arc<dyn Translator>,
        executor: Arc<dyn QueryExecutor>,
        contexts: Arc<dyn ContextStore>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            gate,
            translator,
            executor,
            contexts,
            registry,
            translate_timeout: DEFAULT_STAGE_TIMEOUT,
            execute_timeout: DEFAULT_STAGE_TIMEOUT,
            alerts,
        }
    }

    pub fn with_timeouts(mut self, translate: Duration, execute: Duration) -> Self {
        self.translate_timeout = translate;
        self.execute_timeout = execute;
        self
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<dyn ContextStore> {
        &self.contexts
    }

    /// Runs one turn to a terminal state. Never returns an error: failures become `BLOCKED`/`ERROR` envelopes.
    pub async fn handle_turn(&self, ctx: &TurnContext, request: TurnRequest) -> ResponseEnvelope {
        let user_id = ctx.resolved_user_id().to_string();
        tracing::debug!(target: "askdb::processor", user_id = %user_id, state = ?TurnState::Received, "Turn received");

        if !request.tool_calls.is_empty() {
            tracing::debug!(
                target: "askdb::processor",
                user_id = %user_id,
                state = ?TurnState::DispatchToolCalls,
                calls = request.tool_calls.len(),
                "Dispatching tool calls"
            );
            let results = self.dispatch_tool_calls(ctx, request.tool_calls).await;
            let mut envelope = ResponseEnvelope::new(
                TurnStatus::Ok,
                TurnState::Responded,
                format!("Executed {} tool call(s).", results.len()),
            );
            envelope.tool_results = results;
            return envelope;
        }

        let text = request.latest_user_text().to_string();
        match self.run_natural_language(ctx, &text).await {
            Ok(envelope) => envelope,
            Err(PipelineError::ValidationBlocked { alert }) => {
                publish_alert(&self.alerts, &user_id, &alert);
                ResponseEnvelope::blocked(&alert)
            }
            Err(err) => {
                tracing::error!(target: "askdb::processor", user_id = %user_id, error = %err, "Turn failed");
                ResponseEnvelope::new(TurnStatus::Error, TurnState::Error, err.user_message())
            }
        }
    }

    /// Same gate and dispatch as a tool call inside a turn, for callers invoking one tool directly.
    pub async fn execute_tool(
        &self,
        ctx: &TurnContext,
        name: &str,
        params: serde_json::Value,
    ) -> ToolCallResult {
        let call = ToolCallRequest {
            id: None,
            name: name.to_string(),
            params,
        };
        dispatch_one(
            Arc::clone(&self.registry),
            Arc::clone(&self.gate),
            self.alerts.clone(),
            ctx.clone(),
            call,
        )
        .await
    }

    async fn dispatch_tool_calls(
        &self,
        ctx: &TurnContext,
        calls: Vec<ToolCallRequest>,
    ) -> Vec<ToolCallResult> {
        let idents: Vec<(Option<String>, String)> =
            calls.iter().map(|c| (c.id.clone(), c.name.clone())).collect();
        let handles = calls.into_iter().map(|call| {
            tokio::spawn(dispatch_one(
                Arc::clone(&self.registry),
                Arc::clone(&self.gate),
                self.alerts.clone(),
                ctx.clone(),
                call,
            ))
        });
        join_all(handles)
            .await
            .into_iter()
            .zip(idents)
            .map(|(joined, (id, name))| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(target: "askdb::processor", tool = %name, error = %e, "Tool task aborted");
                    ToolCallResult::failed(id, name, "The tool call failed unexpectedly.".to_string())
                }
            })
            .collect()
    }

    async fn run_natural_language(
        &self,
        ctx: &TurnContext,
        text: &str,
    ) -> Result<ResponseEnvelope, PipelineError> {
        let user_id = ctx.resolved_user_id();
        let mut warnings = Vec::new();

        self.trace_state(user_id, TurnState::ValidateNl);
        let verdict = self
            .gate
            .check_input(text)
            .map_err(|alert| PipelineError::ValidationBlocked { alert })?;
        warnings.extend(verdict.warning);

        if let Some(schema) = SchemaQuery::detect(text) {
            return self.answer_schema_question(user_id, text, schema, warnings).await;
        }

        let translation_context = match self.contexts.get(user_id).await {
            Ok(conversation) => TranslationContext::from_context(&conversation),
            Err(e) => {
                tracing::warn!(target: "askdb::processor", user_id = %user_id, error = %e, "Context unavailable; translating without history");
                TranslationContext::default()
            }
        };

        self.trace_state(user_id, TurnState::Translate);
        let translation = bounded(
            "translation",
            self.translate_timeout,
            self.translator.translate(text, &translation_context),
        )
        .await?;
        let sql = translation
            .sql_query
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::execution("translation", "the model did not produce a SQL query for this question")
            })?;

        self.trace_state(user_id, TurnState::ValidateSql);
        let verdict = self
            .gate
            .check_sql(&sql)
            .map_err(|alert| PipelineError::ValidationBlocked { alert })?;
        warnings.extend(verdict.warning);

        self.trace_state(user_id, TurnState::AssessSensitivity);
        let assessment = self
            .gate
            .check_sensitivity(text, &sql)
            .map_err(|alert| PipelineError::ValidationBlocked { alert })?;
        warnings.extend(assessment.warning);

        self.trace_state(user_id, TurnState::Execute);
        let result = bounded("execution", self.execute_timeout, self.executor.execute(&sql)).await?;

        let message = answer_text(&result);
        let mut update = ContextUpdate {
            last_sql: Some(sql.clone()),
            last_result: Some(result.summary()),
            history_entry: Some(QueryHistoryEntry {
                query: text.to_string(),
                sql: sql.clone(),
                timestamp: now_ms(),
            }),
            ..ContextUpdate::default()
        }
        .with_last_query(text)
        .with_message(ChatMessage::user(text))
        .with_message(ChatMessage::assistant(message.clone()));
        for entity in &translation.entities {
            update.session_entities.insert(
                entity.clone(),
                serde_json::json!({ "intent": translation.intent, "last_seen": now_ms() }),
            );
        }
        self.commit_context(user_id, update, &mut warnings).await;

        let mut envelope = ResponseEnvelope::new(TurnStatus::Ok, TurnState::Responded, message);
        envelope.sql = Some(sql);
        envelope.entities = translation.entities;
        envelope.intent = Some(translation.intent).filter(|i| !i.is_empty());
        envelope.results = Some(result);
        envelope.warnings = warnings;
        Ok(envelope)
    }

    /// Server-built catalog query: no translation and no sensitivity assessment.
    async fn answer_schema_question(
        &self,
        user_id: &str,
        text: &str,
        schema: SchemaQuery,
        mut warnings: Vec<String>,
    ) -> Result<ResponseEnvelope, PipelineError> {
        let sql = schema.sql();
        tracing::info!(target: "askdb::processor", user_id = %user_id, intent = schema.intent(), "Schema question");

        self.trace_state(user_id, TurnState::Execute);
        let result = bounded("execution", self.execute_timeout, self.executor.execute(&sql)).await?;
        let message = schema.format(&result);

        let update = ContextUpdate {
            last_sql: Some(sql.clone()),
            last_result: Some(result.summary()),
            ..ContextUpdate::default()
        }
        .with_last_query(text)
        .with_message(ChatMessage::user(text))
        .with_message(ChatMessage::assistant(message.clone()));
        self.commit_context(user_id, update, &mut warnings).await;

        let mut envelope = ResponseEnvelope::new(TurnStatus::Ok, TurnState::Responded, message);
        envelope.sql = Some(sql);
        envelope.intent = Some(schema.intent().to_string());
        envelope.results = Some(result);
        envelope.warnings = warnings;
        Ok(envelope)
    }

    /// One merge per turn; on failure the prior context is left as it was and the answer still goes out.
    async fn commit_context(&self, user_id: &str, update: ContextUpdate, warnings: &mut Vec<String>) {
        self.trace_state(user_id, TurnState::UpdateContext);
        if let Err(e) = self.contexts.update(user_id, update).await {
            tracing::warn!(
                target: "askdb::processor",
                user_id = %user_id,
                error = %e,
                retryable = e.is_retryable(),
                "Context update failed"
            );
            warnings.push("This answer could not be saved to the conversation history.".to_string());
        }
    }

    fn trace_state(&self, user_id: &str, state: TurnState) {
        tracing::debug!(target: "askdb::processor", user_id = %user_id, state = ?state, "Turn state");
    }
}

/// Awaits a collaborator call under `timeout`; elapsed time becomes `Timeout` (an ERROR, not a block).
async fn bounded<T>(
    stage: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { stage, timeout }),
    }
}

fn answer_text(result: &QueryResult) -> String {
    match result.row_count {
        0 => "The query ran successfully but returned no rows.".to_string(),
        1 => "Found 1 row.".to_string(),
        n => format!("Found {} rows.", n),
    }
}

fn publish_alert(alerts: &broadcast::Sender<AlertEvent>, user_id: &str, alert: &SecurityAlert) {
    tracing::warn!(
        target: "askdb::processor",
        user_id = %user_id,
        alert_type = %alert.alert_type,
        severity = %alert.severity,
        details = %alert.details,
        "Security gate blocked request"
    );
    // No subscribers is fine.
    let _ = alerts.send(AlertEvent {
        user_id: user_id.to_string(),
        alert: alert.summary(),
        timestamp_ms: now_ms(),
    });
}

/// Gate the declared parameter, then invoke through the registry. Owned arguments so it can be spawned.
async fn dispatch_one(
    registry: Arc<ToolRegistry>,
    gate: Arc<SecurityGate>,
    alerts: broadcast::Sender<AlertEvent>,
    ctx: TurnContext,
    call: ToolCallRequest,
) -> ToolCallResult {
    let user_id = ctx.resolved_user_id().to_string();
    let tool = match registry.get(&call.name) {
        Ok(tool) => tool,
        Err(e) => return ToolCallResult::failed(call.id.clone(), call.name.clone(), e.to_string()),
    };

    let screened = match tool.gate() {
        ToolGate::NaturalLanguage(field) => required_str(&call.params, field)
            .map(|text| gate.check_input(text).map(|_| ())),
        ToolGate::Sql(field) => required_str(&call.params, field)
            .map(|sql| gate.check_sql(sql).map(|_| ())),
        ToolGate::None => Ok(Ok(())),
    };
    match screened {
        Err(e) => return ToolCallResult::failed(call.id.clone(), call.name.clone(), e.to_string()),
        Ok(Err(alert)) => {
            publish_alert(&alerts, &user_id, &alert);
            return ToolCallResult::blocked(&call, &alert);
        }
        Ok(Ok(())) => {}
    }

    match registry.execute(&call.name, call.params.clone(), &ctx).await {
        Ok(value) => {
            tracing::info!(target: "askdb::tools", user_id = %user_id, tool = %call.name, "Tool call succeeded");
            ToolCallResult::ok(&call, value)
        }
        Err(ToolError::Pipeline(PipelineError::ValidationBlocked { alert })) => {
            publish_alert(&alerts, &user_id, &alert);
            ToolCallResult::blocked(&call, &alert)
        }
        Err(e) => {
            tracing::warn!(target: "askdb::tools", user_id = %user_id, tool = %call.name, error = %e, "Tool call failed");
            let message = match &e {
                ToolError::Pipeline(p) => p.user_message(),
                other => other.to_string(),
            };
            ToolCallResult::failed(call.id.clone(), call.name.clone(), message)
        }
    }
}
