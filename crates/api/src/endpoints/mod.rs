//! API endpoints.

mod gate;
mod identity;
mod polls;
mod progress;

use axum::{
    Json, Router, middleware::from_fn_with_state, response::IntoResponse, routing::get,
};
use serde_json::json;

use crate::middleware::{AppState, identity_middleware};
use crate::sse;

/// Liveness check.
async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Create the API router.
///
/// Every route except the liveness check runs behind the identity middleware.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/api/polls", polls::router())
        .nest("/api/gate", gate::router())
        .nest("/api/identity", identity::router())
        .nest("/api/progress", progress::router())
        .nest("/streaming", sse::router())
        .layer(from_fn_with_state(state.clone(), identity_middleware));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
        .with_state(state)
}
