//! Request extractors.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
};
use unirank_common::AppError;
use unirank_core::Identity;

use crate::middleware::AppState;

/// Identity resolved for a request, set by the identity middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// The voter's identity.
    pub identity: Identity,
    /// Whether the identity differs from the one in the request cookie.
    pub issued: bool,
}

/// The anonymous voter making the request.
#[derive(Debug, Clone)]
pub struct VoterIdentity(pub Identity);

impl<S> FromRequestParts<S> for VoterIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .map(|resolved| Self(resolved.identity.clone()))
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Voter identity unresolved"))
    }
}

/// A request carrying the administrator bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(AppError::Forbidden(
                "poll administration is disabled".to_string(),
            ));
        };

        let presented = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        if tokens_match(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            Err(AppError::Forbidden("invalid admin token".to_string()))
        }
    }
}

/// Comparison whose duration does not depend on where the tokens differ.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match(b"s3cret", b"s3cret"));
        assert!(!tokens_match(b"s3cret", b"s3creT"));
        assert!(!tokens_match(b"s3cre", b"s3cret"));
        assert!(!tokens_match(b"", b"s3cret"));
    }
}
