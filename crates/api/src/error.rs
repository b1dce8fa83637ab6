//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use supportdesk_shared::DeskError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Conversation already claimed")]
    AlreadyClaimed { staff_id: String },

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Ticketing backend unavailable")]
    BackendUnavailable,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::UnknownRegion(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_REGION", self.to_string()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::AlreadyClaimed { staff_id } => (
                StatusCode::CONFLICT,
                "ALREADY_CLAIMED",
                format!("Conversation is already claimed by {staff_id}"),
            ),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::BackendUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        match err {
            DeskError::UnknownRegion(code) => ApiError::UnknownRegion(code),
            DeskError::AlreadyClaimed { staff_id, .. } => ApiError::AlreadyClaimed {
                staff_id: staff_id.to_string(),
            },
            DeskError::BackendUnavailable(reason) => {
                tracing::warn!(reason = %reason, "Ticketing backend unavailable");
                ApiError::BackendUnavailable
            }
            DeskError::ConversationNotFound(_) | DeskError::WorkItemNotFound(_) => ApiError::NotFound,
            DeskError::Forbidden(reason) => {
                tracing::debug!(reason = %reason, "Request forbidden");
                ApiError::Forbidden
            }
            DeskError::InvalidTransition(msg) | DeskError::Conflict(msg) => ApiError::Conflict(msg),
            DeskError::Validation(msg) => ApiError::Validation(msg),
            DeskError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage failure");
                ApiError::Database(msg)
            }
            DeskError::ConnectionDead(_) => ApiError::Internal,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use supportdesk_shared::{ConversationId, UserId};

    #[test]
    fn test_domain_error_status_codes() {
        let cases = [
            (DeskError::UnknownRegion("mars".into()), StatusCode::BAD_REQUEST),
            (
                DeskError::AlreadyClaimed {
                    conversation_id: ConversationId::new(),
                    staff_id: UserId::new(),
                },
                StatusCode::CONFLICT,
            ),
            (DeskError::BackendUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (DeskError::ConversationNotFound(ConversationId::new()), StatusCode::NOT_FOUND),
            (DeskError::Forbidden("customer".into()), StatusCode::FORBIDDEN),
            (DeskError::InvalidTransition("closed".into()), StatusCode::CONFLICT),
            (DeskError::Storage("pool".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
