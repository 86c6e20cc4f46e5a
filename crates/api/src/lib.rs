//! HTTP API layer for unirank.
//!
//! This crate provides the JSON API and live result streams:
//!
//! - **Endpoints**: polls, voting, gates, identity and progress
//! - **Middleware**: anonymous identity resolution and the identity cookie
//! - **Streaming**: Server-Sent Events carrying result snapshots
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;
pub mod sse;

pub use endpoints::router;
pub use middleware::{AppState, HeaderSignals, identity_middleware};
