//! Identity endpoint.

#![allow(missing_docs)]

use axum::{Extension, Router, routing::post};
use serde::Serialize;
use unirank_core::Identity;

use crate::{extractors::ResolvedIdentity, middleware::AppState, response::ApiResponse};

/// Identity response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub identity: Identity,
    /// Derived from the weaker fallback composite.
    pub fallback: bool,
    /// Newly issued to this client with this response.
    pub issued: bool,
}

/// The caller's identity token.
async fn resolve(
    Extension(resolved): Extension<ResolvedIdentity>,
) -> ApiResponse<IdentityResponse> {
    ApiResponse::ok(IdentityResponse {
        fallback: resolved.identity.is_fallback(),
        identity: resolved.identity,
        issued: resolved.issued,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/resolve", post(resolve))
}
