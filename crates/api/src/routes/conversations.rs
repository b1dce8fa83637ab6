//! Conversation transition endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use supportdesk_shared::{Conversation, ConversationId};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReassignRegionRequest {
    pub region: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub score: i16,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub conversation_id: ConversationId,
    pub unread_count: i64,
}

/// Staff takes over a waiting conversation
pub async fn claim(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .conversations
        .claim(ConversationId(id), auth_user.actor())
        .await?;
    Ok(Json(conversation))
}

/// Hand the conversation back to the AI assistant
pub async fn switch_to_ai(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .conversations
        .switch_to_ai(ConversationId(id), auth_user.actor())
        .await?;
    Ok(Json(conversation))
}

/// Admin-only region change
pub async fn reassign_region(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReassignRegionRequest>,
) -> ApiResult<Json<Conversation>> {
    let reason = req.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
    let conversation = state
        .conversations
        .reassign_region(ConversationId(id), auth_user.actor(), req.region.trim(), reason)
        .await?;
    Ok(Json(conversation))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UnreadResponse>> {
    let conversation_id = ConversationId(id);
    let unread_count = state
        .conversations
        .mark_read(conversation_id, auth_user.actor())
        .await?;
    Ok(Json(UnreadResponse {
        conversation_id,
        unread_count,
    }))
}

pub async fn submit_rating(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RatingRequest>,
) -> ApiResult<Json<Conversation>> {
    let conversation = state
        .conversations
        .submit_rating(ConversationId(id), auth_user.actor(), req.score, req.comment.as_deref())
        .await?;
    Ok(Json(conversation))
}
