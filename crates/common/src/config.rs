//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{AppError, AppResult};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration. Realtime fan-out stays process-local without it.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Voting and result-view configuration.
    #[serde(default)]
    pub voting: VotingConfig,
    /// Anonymous identity configuration.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Poll administration.
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds (SSE streams are exempt).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    /// TTL of cached progress records, in seconds.
    #[serde(default = "default_progress_ttl_secs")]
    pub progress_ttl_secs: u64,
}

/// Rule used to decide whether a category view is unlocked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryGatePolicy {
    /// Unlocked once the identity has voted in at least one poll of the category.
    #[default]
    Any,
    /// Unlocked only once the identity has voted in every poll of the category.
    All,
}

/// Voting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VotingConfig {
    /// Interval of the backstop pull for open result views, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Window in which push invalidations are coalesced, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Category gating rule.
    #[serde(default)]
    pub category_gate_policy: CategoryGatePolicy,
    /// Maximum number of options per poll.
    #[serde(default = "default_max_options")]
    pub max_options: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            debounce_ms: default_debounce_ms(),
            category_gate_policy: CategoryGatePolicy::default(),
            max_options: default_max_options(),
        }
    }
}

impl VotingConfig {
    /// Backstop pull interval.
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Invalidation debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reject settings the realtime synchronizer and poll creation cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.sync_interval_secs == 0 {
            return Err(AppError::Config(
                "voting.sync_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.debounce_ms == 0 {
            return Err(AppError::Config(
                "voting.debounce_ms must be at least 1".to_string(),
            ));
        }
        if self.max_options < 2 {
            return Err(AppError::Config(
                "voting.max_options must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

/// Anonymous identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Salt mixed into every fingerprint hash.
    #[serde(default = "default_identity_salt")]
    pub salt: String,
    /// Name of the cookie caching the identity token.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Whether the identity cookie is marked `Secure`.
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            salt: default_identity_salt(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
        }
    }
}

/// Poll administration configuration.
///
/// Creating and closing polls requires `Authorization: Bearer <token>`.
/// Without a token both operations are refused.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token of poll administrators.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_max_connections() -> u32 {
    50
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "unirank".to_string()
}

const fn default_progress_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

const fn default_sync_interval_secs() -> u64 {
    30
}

const fn default_debounce_ms() -> u64 {
    300
}

const fn default_max_options() -> usize {
    64
}

fn default_identity_salt() -> String {
    "unirank".to_string()
}

fn default_cookie_name() -> String {
    "unirank_voter".to_string()
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `UNIRANK_ENV`)
    /// 4. Environment variables with `UNIRANK__` prefix
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let env = std::env::var("UNIRANK_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("UNIRANK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::checked(config.try_deserialize()?)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("UNIRANK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::checked(config.try_deserialize()?)
    }

    fn checked(config: Self) -> AppResult<Self> {
        config.voting.validate()?;
        Ok(config)
    }
}
