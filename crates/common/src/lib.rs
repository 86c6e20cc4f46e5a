//! Shared building blocks for the unirank crates.
//!
//! [`Config`] is loaded once by the server and handed to every service.
//! Failures travel as [`AppError`]; the infrastructure variants are
//! retryable and [`retry_with_backoff`] retries exactly those.
//!
//! ```no_run
//! use unirank_common::{AppResult, Config, RetryConfig, retry_with_backoff};
//!
//! async fn connect() -> AppResult<()> {
//!     let config = Config::load()?;
//!     retry_with_backoff(&RetryConfig::startup(), "connect", || async {
//!         println!("voting cycle sync every {}s", config.voting.sync_interval_secs);
//!         Ok(())
//!     })
//!     .await
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod retry;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use retry::{RetryConfig, retry_with_backoff};
