//! Authentication middleware

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use supportdesk_shared::{Actor, Role, UserId};

use super::jwt::{JwtError, JwtManager};
use crate::error::ApiError;

#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: Arc<JwtManager>,
}

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.user_id, self.role)
    }

    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

/// `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify a token and build the caller
pub fn authenticate_token(jwt: &JwtManager, token: &str) -> Result<AuthUser, ApiError> {
    let claims = jwt.verify(token).map_err(|e| {
        match &e {
            JwtError::MalformedClaims(_) => tracing::warn!(error = %e, "Token carries unusable claims"),
            _ => tracing::debug!(error = %e, "Token validation failed"),
        }
        ApiError::InvalidToken
    })?;

    Ok(AuthUser {
        user_id: claims.sub,
        role: claims.role,
        email: claims.email,
    })
}

pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;
    let auth_user = authenticate_token(&auth_state.jwt_manager, token)?;

    request.extensions_mut().insert(auth_user);
    Ok(next.run(request).await)
}
