//! Result gate endpoints.

#![allow(missing_docs)]

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use unirank_common::AppResult;
use unirank_core::{CategoryGate, GateState, GateTarget};
use validator::Validate;

use crate::{extractors::VoterIdentity, middleware::AppState, response::ApiResponse};

/// Poll gate request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PollGateRequest {
    #[validate(length(min = 1, max = 64))]
    pub poll_id: String,
}

/// Category gate request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CategoryGateRequest {
    #[validate(length(min = 1, max = 64))]
    pub category: String,
}

/// Poll gate response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollGateResponse {
    pub poll_id: String,
    pub state: GateState,
}

/// Gate state of a poll for the caller.
async fn poll_gate(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
    Json(req): Json<PollGateRequest>,
) -> AppResult<ApiResponse<PollGateResponse>> {
    req.validate()?;
    let gate = state
        .gate_service
        .get_gate_state(&GateTarget::Poll(req.poll_id.clone()), &identity)
        .await;
    Ok(ApiResponse::ok(PollGateResponse {
        poll_id: req.poll_id,
        state: gate,
    }))
}

/// Gate state and completion of a category for the caller.
///
/// Lookup failures are reported as errors here, unlike the poll gate, since
/// the completion figures cannot be shown without the lookups.
async fn category_gate(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
    Json(req): Json<CategoryGateRequest>,
) -> AppResult<ApiResponse<CategoryGate>> {
    req.validate()?;
    let gate = state
        .gate_service
        .category_gate(&req.category, &identity)
        .await?;
    Ok(ApiResponse::ok(gate))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/poll", post(poll_gate))
        .route("/category", post(category_gate))
}
