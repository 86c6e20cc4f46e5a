//! Progress mirror endpoints.

use axum::{Router, extract::State, routing::post};
use unirank_common::AppResult;
use unirank_core::LocalProgress;

use crate::{extractors::VoterIdentity, middleware::AppState, response::ApiResponse};

/// The caller's progress record.
async fn show(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<LocalProgress>> {
    let progress = state.gate_service.progress(&identity).await?;
    Ok(ApiResponse::ok(progress))
}

/// Rebuild the caller's progress record from the ledger.
async fn reconcile(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<LocalProgress>> {
    let progress = state.gate_service.reconcile(&identity).await?;
    Ok(ApiResponse::ok(progress))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/show", post(show))
        .route("/reconcile", post(reconcile))
}
