//! API response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};
use unirank_core::VoteError;

/// Success envelope: `{ "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Payload.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap a payload.
    pub const fn ok(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// A rejected vote, rendered in the same error shape as `AppError`.
///
/// `AlreadyVoted` never reaches this type; the vote endpoint reports it as a
/// successful outcome.
#[derive(Debug)]
pub struct VoteRejection(pub VoteError);

impl VoteRejection {
    /// HTTP status of the rejection.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self.0 {
            VoteError::AlreadyVoted { .. } => StatusCode::CONFLICT,
            VoteError::Invalid(_) => StatusCode::BAD_REQUEST,
            VoteError::StorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Error code of the rejection.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self.0 {
            VoteError::AlreadyVoted { .. } => "ALREADY_VOTED",
            VoteError::Invalid(_) => "INVALID_VOTE",
            VoteError::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }
}

impl IntoResponse for VoteRejection {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            error!(error = %self.0, code, "Vote could not be recorded");
        } else {
            debug!(error = %self.0, code, "Vote rejected");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
                "retryable": self.0.is_retryable(),
            }
        }));
        (status, body).into_response()
    }
}
