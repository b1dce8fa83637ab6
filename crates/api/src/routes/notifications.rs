//! Notification reconciliation routes
//!
//! Clients poll here after a reconnect to pick up anything the live stream
//! missed. Ids match the ones pushed live, so clients drop what they
//! already have.

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use supportdesk_shared::NotificationEvent;
use time::OffsetDateTime;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    /// RFC 3339 timestamp; only newer notifications are returned
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<NotificationEvent>,
    /// Pass back as `since` on the next poll
    #[serde(with = "time::serde::rfc3339::option")]
    pub cursor: Option<OffsetDateTime>,
}

/// List the caller's notifications, oldest first
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<NotificationsQuery>,
) -> ApiResult<Json<NotificationsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::Validation(format!("limit must be between 1 and {MAX_LIMIT}")));
    }

    let notifications = state
        .store
        .list_notifications_since(auth_user.user_id, query.since, limit)
        .await
        .map_err(supportdesk_shared::DeskError::from)?;

    let cursor = notifications.last().map(|n| n.created_at).or(query.since);

    Ok(Json(NotificationsResponse { notifications, cursor }))
}
