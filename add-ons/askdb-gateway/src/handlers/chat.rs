//! Turn and tool routes. Every turn gets a fresh correlation id so its log lines can be joined.

use super::ApiError;
use crate::AppState;
use askdb_core::{ResponseEnvelope, ToolCallResult, ToolDescriptor, TurnContext, TurnRequest};
use axum::extract::{Json, Path, State};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    #[serde(default)]
    user_id: String,
    #[serde(flatten)]
    turn: TurnRequest,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolInvocation {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    params: serde_json::Value,
}

fn turn_context(user_id: String) -> TurnContext {
    TurnContext::new(user_id).with_correlation_id(uuid::Uuid::new_v4().to_string())
}

/// POST /api/v1/chat – runs one turn (messages or explicit tool calls).
pub(crate) async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Json<ResponseEnvelope> {
    let ctx = turn_context(body.user_id);
    tracing::info!(
        target: "askdb::gateway",
        user_id = %ctx.resolved_user_id(),
        correlation_id = ctx.correlation_id.as_deref().unwrap_or(""),
        tool_calls = body.turn.tool_calls.len(),
        "Chat turn"
    );
    Json(state.processor.handle_turn(&ctx, body.turn).await)
}

/// GET /api/v1/tools – registered tools with their parameter schemas.
pub(crate) async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolDescriptor>> {
    Json(state.processor.registry().list())
}

/// POST /api/v1/tools/:name – invokes one tool through the same gate as a tool call in a turn.
pub(crate) async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ToolInvocation>,
) -> Result<Json<ToolCallResult>, ApiError> {
    state.processor.registry().get(&name)?;
    if !body.params.is_null() && !body.params.is_object() {
        return Err(ApiError::bad_request("params must be a JSON object"));
    }
    let ctx = turn_context(body.user_id);
    Ok(Json(state.processor.execute_tool(&ctx, &name, body.params).await))
}
