//! Ticket routing endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use supportdesk_shared::{BackendUserId, WorkItemId};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::notifications::DomainEvent;
use crate::routing::AssignmentResult;
use crate::state::AppState;

/// Route a ticket to the least-loaded available agent of its group
pub async fn assign(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<AssignmentResult>> {
    auth_user.require_staff()?;

    tracing::info!(work_item = id, requested_by = %auth_user.user_id, "Assignment requested");
    let result = state.routing.assign(WorkItemId(id)).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ReplyPostedRequest {
    pub customer_id: i64,
    pub article_id: i64,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ReplyPostedResponse {
    pub notified: usize,
}

/// Staff posted a reply on a ticket; tell the customer
pub async fn reply_posted(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<ReplyPostedRequest>,
) -> ApiResult<Json<ReplyPostedResponse>> {
    auth_user.require_staff()?;
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("title is required".to_string()));
    }

    let event = DomainEvent::TicketReplied {
        work_item_id: WorkItemId(id),
        title: req.title.trim().to_string(),
        customer: BackendUserId(req.customer_id),
        article_id: req.article_id,
    };
    let notifications = state.fanout.deliver(&event).await?;

    Ok(Json(ReplyPostedResponse {
        notified: notifications.len(),
    }))
}
