//! API routes

pub mod conversations;
pub mod health;
pub mod notifications;
pub mod work_items;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState, stream::stream_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        // Conversation transitions
        .route("/conversations/:id/claim", post(conversations::claim))
        .route("/conversations/:id/ai", post(conversations::switch_to_ai))
        .route("/conversations/:id/region", post(conversations::reassign_region))
        .route("/conversations/:id/read", post(conversations::mark_read))
        .route("/conversations/:id/rating", post(conversations::submit_rating))
        // Ticket routing
        .route("/work-items/:id/assign", post(work_items::assign))
        .route("/work-items/:id/replies", post(work_items::reply_posted))
        // Reconciliation poll
        .route("/notifications", get(notifications::list_notifications))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Stream route (auth handled in handler, header or query parameter)
    let stream_routes = Router::new().route("/stream", get(stream_handler));

    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(stream_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
