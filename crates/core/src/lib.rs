//! Core business logic for unirank.
//!
//! The vote ledger, ranking aggregator, visibility gate and realtime
//! synchronizer live here, on top of the [`services::PollStore`] storage seam.

pub mod services;

pub use services::*;
