//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use supportdesk_shared::db;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
    pub streams: StreamHealth,
}

#[derive(Serialize)]
pub struct StreamHealth {
    pub active_connections: usize,
    pub staff_connections: usize,
    pub admin_connections: usize,
}

async fn database_status(state: &AppState) -> &'static str {
    match &state.pool {
        Some(pool) => match db::ping(pool).await {
            Ok(()) => "healthy",
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                "unhealthy"
            }
        },
        None => "in-memory",
    }
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = database_status(&state).await;
    let stats = state.hub.stats().await;

    let overall_status = if db_status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        overall_status,
        Json(HealthResponse {
            status: if overall_status == StatusCode::OK {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
            streams: StreamHealth {
                active_connections: stats.active_connections,
                staff_connections: stats.staff_connections,
                admin_connections: stats.admin_connections,
            },
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (checks if the service is ready to accept traffic)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match database_status(&state).await {
        "unhealthy" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}
