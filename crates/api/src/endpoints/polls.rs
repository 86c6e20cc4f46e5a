//! Poll and vote endpoints.

#![allow(missing_docs)]

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};
use unirank_common::AppResult;
use unirank_core::{
    CreatePollInput, GateState, GateTarget, PollResults, PollSnapshot, VoteError, VoteReceipt,
};
use unirank_db::entities::{poll, poll_option};
use unirank_db::repositories::PollFilter;
use validator::Validate;

use crate::{
    extractors::{AdminAccess, VoterIdentity},
    middleware::AppState,
    response::{ApiResponse, VoteRejection},
};

/// Poll option response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub position: i32,
}

impl From<poll_option::Model> for PollOptionResponse {
    fn from(option: poll_option::Model) -> Self {
        Self {
            id: option.id,
            name: option.name,
            short_name: option.short_name,
            color: option.color,
            position: option.position,
        }
    }
}

/// Poll response. `options` is omitted in listings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub id: String,
    pub question: String,
    pub category: String,
    pub cycle: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<PollOptionResponse>>,
}

impl From<poll::Model> for PollResponse {
    fn from(poll: poll::Model) -> Self {
        Self {
            id: poll.id,
            question: poll.question,
            category: poll.category,
            cycle: poll.cycle,
            is_active: poll.is_active,
            ends_at: poll.ends_at.map(|e| e.to_rfc3339()),
            created_at: poll.created_at.to_rfc3339(),
            options: None,
        }
    }
}

impl From<PollSnapshot> for PollResponse {
    fn from(snapshot: PollSnapshot) -> Self {
        let options = snapshot.options.into_iter().map(Into::into).collect();
        Self {
            options: Some(options),
            ..Self::from(snapshot.poll)
        }
    }
}

/// Request naming a single poll.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PollIdRequest {
    #[validate(length(min = 1, max = 64))]
    pub poll_id: String,
}

/// List polls request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListPollsRequest {
    #[validate(length(min = 1, max = 64))]
    pub category: Option<String>,
    #[validate(length(equal = 7))]
    pub cycle: Option<String>,
    #[serde(default)]
    pub active_only: bool,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

const fn default_limit() -> u64 {
    20
}

/// Vote request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[validate(length(min = 1, max = 64))]
    pub poll_id: String,
    #[validate(length(min = 1, max = 64))]
    pub option_id: String,
}

/// Outcome of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VoteStatus {
    Recorded,
    AlreadyVoted,
}

/// Vote response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub status: VoteStatus,
    pub poll_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<VoteReceipt>,
}

/// Has-voted response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HasVotedResponse {
    pub poll_id: String,
    pub has_voted: bool,
}

/// Gated results response. `results` is present only when `Unlocked`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatedResultsResponse {
    pub gate: GateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<PollResults>,
}

/// Create a poll. Administrators only.
async fn create_poll(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Json(input): Json<CreatePollInput>,
) -> AppResult<ApiResponse<PollResponse>> {
    let snapshot = state.poll_service.create_poll(input).await?;
    Ok(ApiResponse::ok(snapshot.into()))
}

/// Get a poll with its options.
async fn show_poll(
    State(state): State<AppState>,
    Json(req): Json<PollIdRequest>,
) -> AppResult<ApiResponse<PollResponse>> {
    req.validate()?;
    let snapshot = state.poll_service.get_poll(&req.poll_id).await?;
    Ok(ApiResponse::ok(snapshot.into()))
}

/// List polls.
async fn list_polls(
    State(state): State<AppState>,
    Json(req): Json<ListPollsRequest>,
) -> AppResult<ApiResponse<Vec<PollResponse>>> {
    req.validate()?;
    let filter = PollFilter {
        category: req.category,
        cycle: req.cycle,
        active_only: req.active_only,
    };
    let polls = state.poll_service.list_polls(&filter, req.limit).await?;
    Ok(ApiResponse::ok(polls.into_iter().map(Into::into).collect()))
}

/// Stop accepting votes on a poll. Administrators only.
async fn close_poll(
    _admin: AdminAccess,
    State(state): State<AppState>,
    Json(req): Json<PollIdRequest>,
) -> AppResult<ApiResponse<PollResponse>> {
    req.validate()?;
    let poll = state.poll_service.close_poll(&req.poll_id).await?;
    Ok(ApiResponse::ok(poll.into()))
}

/// Cast a vote.
async fn vote(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> Result<ApiResponse<VoteResponse>, VoteRejection> {
    req.validate()
        .map_err(|e| VoteRejection(VoteError::Invalid(e.to_string())))?;

    let outcome = state
        .ledger_service
        .cast_vote(&req.poll_id, &req.option_id, &identity)
        .await;

    let response = match outcome {
        Ok(receipt) => VoteResponse {
            status: VoteStatus::Recorded,
            poll_id: req.poll_id,
            receipt: Some(receipt),
        },
        Err(VoteError::AlreadyVoted { poll_id }) => VoteResponse {
            status: VoteStatus::AlreadyVoted,
            poll_id,
            receipt: None,
        },
        Err(e) => return Err(VoteRejection(e)),
    };
    Ok(ApiResponse::ok(response))
}

/// Whether the caller voted on a poll.
async fn has_voted(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
    Json(req): Json<PollIdRequest>,
) -> AppResult<ApiResponse<HasVotedResponse>> {
    req.validate()?;
    let has_voted = state.gate_service.has_voted(&req.poll_id, &identity).await?;
    Ok(ApiResponse::ok(HasVotedResponse {
        poll_id: req.poll_id,
        has_voted,
    }))
}

/// Results of a poll, visible only to those who voted.
async fn results(
    VoterIdentity(identity): VoterIdentity,
    State(state): State<AppState>,
    Json(req): Json<PollIdRequest>,
) -> AppResult<ApiResponse<GatedResultsResponse>> {
    req.validate()?;
    let gate = state
        .gate_service
        .get_gate_state(&GateTarget::Poll(req.poll_id.clone()), &identity)
        .await;

    let results = if gate == GateState::Unlocked {
        Some(state.aggregator.get_results(&req.poll_id).await?)
    } else {
        None
    };
    Ok(ApiResponse::ok(GatedResultsResponse { gate, results }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create_poll))
        .route("/show", post(show_poll))
        .route("/list", post(list_polls))
        .route("/close", post(close_poll))
        .route("/vote", post(vote))
        .route("/has-voted", post(has_voted))
        .route("/results", post(results))
}
