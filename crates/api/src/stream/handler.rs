//! SSE handler for Axum
//!
//! Authenticates the caller, registers a live stream with the hub and
//! forwards hub frames as server-sent events until the client goes away.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use super::connection::HubFrame;
use super::hub::StreamGuard;
use crate::auth::{authenticate_token, bearer_token};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    token: Option<String>,
}

/// Event streams can't always set headers (EventSource), so the token may
/// also come as a query parameter.
pub async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(params.token)
        .ok_or(ApiError::Unauthorized)?;
    let auth_user = authenticate_token(&state.jwt_manager, &token)?;

    tracing::info!(user_id = %auth_user.user_id, role = auth_user.role.as_str(), "Stream requested");

    let (tx, rx) = state.hub.channel();
    let conn = state.hub.register(auth_user.user_id, auth_user.role, tx).await;
    let guard = StreamGuard::new(state.hub.clone(), conn);

    let stream = ReceiverStream::new(rx).map(move |frame| {
        // Dropping the stream drops the guard, which unregisters
        let _guard = &guard;
        Ok(to_sse(frame))
    });

    Ok(Sse::new(stream))
}

fn to_sse(frame: HubFrame) -> Event {
    match frame {
        HubFrame::KeepAlive => Event::default().comment("keep-alive"),
        HubFrame::Event(event) => {
            let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                tracing::error!(event_id = %event.id, error = %e, "Failed to serialize stream event");
                "{}".to_string()
            });
            Event::default().event(event.kind.as_str()).id(event.id).data(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEvent;
    use uuid::Uuid;

    #[test]
    fn test_keep_alive_is_comment() {
        let rendered = format!("{:?}", to_sse(HubFrame::KeepAlive));
        assert!(rendered.contains("keep-alive"));
    }

    #[test]
    fn test_event_carries_type_and_id() {
        let session_id = Uuid::new_v4();
        let rendered = format!("{:?}", to_sse(HubFrame::Event(StreamEvent::connected(session_id))));
        assert!(rendered.contains("connected"));
        assert!(rendered.contains(&session_id.to_string()));
    }
}
