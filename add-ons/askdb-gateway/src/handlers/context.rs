//! Context Store routes.

use super::ApiError;
use crate::AppState;
use askdb_core::{ContextStore, ContextUpdate, ConversationContext, MemoryBlock};
use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct NewMemory {
    content: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// GET /api/v1/context/:user_id
pub(crate) async fn get_context(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ConversationContext>, ApiError> {
    Ok(Json(state.processor.contexts().get(&user_id).await?))
}

/// PUT /api/v1/context/:user_id – partial merge; absent fields are left as they are.
pub(crate) async fn update_context(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<ContextUpdate>,
) -> Result<Json<ConversationContext>, ApiError> {
    Ok(Json(state.processor.contexts().update(&user_id, update).await?))
}

/// DELETE /api/v1/context/:user_id
pub(crate) async fn clear_context(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.processor.contexts().clear(&user_id).await?;
    tracing::info!(target: "askdb::gateway", user_id = %user_id, "Context cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/context/:user_id/memories
pub(crate) async fn list_memories(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<MemoryBlock>>, ApiError> {
    Ok(Json(state.processor.contexts().memories(&user_id).await?))
}

/// POST /api/v1/context/:user_id/memories
pub(crate) async fn add_memory(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<NewMemory>,
) -> Result<(StatusCode, Json<MemoryBlock>), ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }
    let block = state
        .processor
        .contexts()
        .add_memory(&user_id, &body.content, body.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}
