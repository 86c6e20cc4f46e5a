//! Anonymous voter identity.
//!
//! An identity is a salted hash of device signals. The primary strategy hashes
//! a composite of stable signals; when those cannot be collected the service
//! falls back to a weaker composite (user agent, locale, screen, day) instead
//! of rejecting the voter.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use unirank_common::{AppError, AppResult};

use super::{Clock, system_clock};

/// Prefix of identities derived from the primary signal composite.
const PRIMARY_PREFIX: &str = "v1-";
/// Prefix of identities derived from the fallback composite.
const FALLBACK_PREFIX: &str = "fb-";
/// Hex digits kept from the digest.
const TOKEN_HEX_LEN: usize = 32;
/// Minimum number of non-empty components for the primary strategy.
const MIN_PRIMARY_COMPONENTS: usize = 3;

/// Opaque anonymous per-device voting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    fn from_digest(prefix: &str, digest: &[u8]) -> Self {
        let mut hex = hex::encode(digest);
        hex.truncate(TOKEN_HEX_LEN);
        Self(format!("{prefix}{hex}"))
    }

    /// Parse a token presented by a client.
    ///
    /// Only well-formed tokens are accepted so that arbitrary client input
    /// never becomes a voting key.
    pub fn parse(token: &str) -> AppResult<Self> {
        let token = token.trim();
        let hex = token
            .strip_prefix(PRIMARY_PREFIX)
            .or_else(|| token.strip_prefix(FALLBACK_PREFIX))
            .ok_or_else(|| AppError::BadRequest("malformed voter identity".to_string()))?;

        let well_formed = hex.len() == TOKEN_HEX_LEN
            && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(AppError::BadRequest("malformed voter identity".to_string()));
        }
        Ok(Self(token.to_string()))
    }

    /// The token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity came from the weaker fallback composite.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.0.starts_with(FALLBACK_PREFIX)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable device/browser signals, keyed by component name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct DeviceSignals {
    /// Signal components. Sorted, so hashing is order-independent.
    pub components: BTreeMap<String, String>,
}

impl DeviceSignals {
    /// Number of components carrying a value.
    #[must_use]
    pub fn usable_components(&self) -> usize {
        self.components
            .values()
            .filter(|v| !v.trim().is_empty())
            .count()
    }
}

/// Weak, purely local composite used when device signals are unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackSignals {
    /// User agent string.
    pub user_agent: String,
    /// Preferred locale.
    pub locale: String,
    /// Screen geometry, e.g. `1920x1080`.
    pub screen: String,
}

/// Where identity signals come from.
pub trait SignalSource: Send + Sync {
    /// Collect the primary signal composite.
    ///
    /// Fails with [`AppError::IdentityUnavailable`] when the signals cannot be
    /// collected.
    fn collect(&self) -> AppResult<DeviceSignals>;

    /// Collect the fallback composite. Never fails.
    fn fallback(&self) -> FallbackSignals;
}

/// Durable storage for a resolved identity.
#[async_trait]
pub trait IdentityCache: Send + Sync {
    /// Previously stored identity, if any.
    async fn load(&self) -> AppResult<Option<Identity>>;

    /// Remember an identity.
    async fn store(&self, identity: &Identity) -> AppResult<()>;
}

/// [`IdentityCache`] held in memory.
#[derive(Default)]
pub struct MemoryIdentityCache {
    identity: Mutex<Option<Identity>>,
}

impl MemoryIdentityCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that already holds an identity.
    #[must_use]
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

#[async_trait]
impl IdentityCache for MemoryIdentityCache {
    async fn load(&self) -> AppResult<Option<Identity>> {
        self.identity
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| AppError::Internal("identity cache lock poisoned".to_string()))
    }

    async fn store(&self, identity: &Identity) -> AppResult<()> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|_| AppError::Internal("identity cache lock poisoned".to_string()))?;
        *guard = Some(identity.clone());
        Ok(())
    }
}

/// Derives and caches anonymous identities.
#[derive(Clone)]
pub struct IdentityService {
    salt: String,
    clock: Clock,
}

impl IdentityService {
    /// Create a new identity service.
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        Self::with_clock(salt, system_clock())
    }

    /// Create an identity service with an explicit clock.
    #[must_use]
    pub fn with_clock(salt: impl Into<String>, clock: Clock) -> Self {
        Self {
            salt: salt.into(),
            clock,
        }
    }

    /// Resolve the identity for a device.
    ///
    /// A cached identity is returned as is. Otherwise the identity is derived
    /// (primary, then fallback) and stored in the cache. Cache failures are
    /// logged and never fail resolution.
    pub async fn resolve(&self, cache: &dyn IdentityCache, source: &dyn SignalSource) -> Identity {
        match cache.load().await {
            Ok(Some(identity)) => return identity,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Identity cache unreadable, deriving a new identity"),
        }

        let identity = self.derive(source);
        if let Err(e) = cache.store(&identity).await {
            warn!(error = %e, "Failed to cache identity");
        }
        identity
    }

    /// Derive an identity without consulting any cache.
    #[must_use]
    pub fn derive(&self, source: &dyn SignalSource) -> Identity {
        match source.collect().and_then(|signals| self.derive_primary(&signals)) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(error = %e, "Primary identity unavailable, using fallback composite");
                self.derive_fallback(&source.fallback())
            }
        }
    }

    /// Hash the primary signal composite.
    pub fn derive_primary(&self, signals: &DeviceSignals) -> AppResult<Identity> {
        let usable = signals.usable_components();
        if usable < MIN_PRIMARY_COMPONENTS {
            return Err(AppError::IdentityUnavailable(format!(
                "{usable} usable device signals, need {MIN_PRIMARY_COMPONENTS}"
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        for (name, value) in &signals.components {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Ok(Identity::from_digest(PRIMARY_PREFIX, &hasher.finalize()))
    }

    /// Hash the fallback composite. Stable for one device within a day.
    #[must_use]
    pub fn derive_fallback(&self, signals: &FallbackSignals) -> Identity {
        let day = (self.clock)().format("%Y-%m-%d").to_string();

        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        for part in [
            signals.user_agent.as_str(),
            signals.locale.as_str(),
            signals.screen.as_str(),
            day.as_str(),
        ] {
            hasher.update(b"\n");
            hasher.update(part.as_bytes());
        }
        Identity::from_digest(FALLBACK_PREFIX, &hasher.finalize())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        signals: Option<DeviceSignals>,
        collected: AtomicUsize,
    }

    impl FakeSource {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                signals: Some(DeviceSignals {
                    components: pairs
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                }),
                collected: AtomicUsize::new(0),
            }
        }

        fn unavailable() -> Self {
            Self {
                signals: None,
                collected: AtomicUsize::new(0),
            }
        }
    }

    impl SignalSource for FakeSource {
        fn collect(&self) -> AppResult<DeviceSignals> {
            self.collected.fetch_add(1, Ordering::SeqCst);
            self.signals
                .clone()
                .ok_or_else(|| AppError::IdentityUnavailable("blocked".to_string()))
        }

        fn fallback(&self) -> FallbackSignals {
            FallbackSignals {
                user_agent: "Mozilla/5.0".to_string(),
                locale: "en-US".to_string(),
                screen: "1920x1080".to_string(),
            }
        }
    }

    fn fixed_clock(day: u32, hour: u32) -> Clock {
        Arc::new(move || Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap())
    }

    const SIGNALS: [(&str, &str); 3] = [("canvas", "abc"), ("gpu", "ANGLE"), ("tz", "UTC")];

    #[test]
    fn test_primary_is_deterministic_and_order_independent() {
        let service = IdentityService::new("salt");
        let a = service.derive(&FakeSource::new(&SIGNALS));
        let b = service.derive(&FakeSource::new(&[SIGNALS[2], SIGNALS[0], SIGNALS[1]]));

        assert_eq!(a, b);
        assert!(!a.is_fallback());
        assert_eq!(Identity::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn test_distinct_devices_get_distinct_identities() {
        let service = IdentityService::new("salt");
        let a = service.derive(&FakeSource::new(&SIGNALS));
        let b = service.derive(&FakeSource::new(&[("canvas", "xyz"), SIGNALS[1], SIGNALS[2]]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_changes_identity() {
        let source = FakeSource::new(&SIGNALS);
        assert_ne!(
            IdentityService::new("one").derive(&source),
            IdentityService::new("two").derive(&source)
        );
    }

    #[test]
    fn test_too_few_signals_is_unavailable() {
        let service = IdentityService::new("salt");
        let signals = DeviceSignals {
            components: [("canvas", "abc"), ("gpu", " "), ("tz", "UTC")]
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        };

        assert!(matches!(
            service.derive_primary(&signals),
            Err(AppError::IdentityUnavailable(_))
        ));
    }

    #[test]
    fn test_fallback_is_stable_within_a_day() {
        let morning = IdentityService::with_clock("salt", fixed_clock(17, 8));
        let evening = IdentityService::with_clock("salt", fixed_clock(17, 22));
        let next_day = IdentityService::with_clock("salt", fixed_clock(18, 8));
        let source = FakeSource::unavailable();

        let a = morning.derive(&source);
        assert!(a.is_fallback());
        assert_eq!(a, evening.derive(&source));
        assert_ne!(a, next_day.derive(&source));
    }

    #[tokio::test]
    async fn test_resolve_uses_cache_without_recomputing() {
        let service = IdentityService::new("salt");
        let cache = MemoryIdentityCache::new();
        let source = FakeSource::new(&SIGNALS);

        let first = service.resolve(&cache, &source).await;
        let second = service.resolve(&cache, &source).await;

        assert_eq!(first, second);
        assert_eq!(source.collected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse("v1-short").is_err());
        assert!(Identity::parse("v2-0123456789abcdef0123456789abcdef").is_err());
        assert!(Identity::parse("v1-0123456789ABCDEF0123456789abcdef").is_err());
        assert!(Identity::parse("fb-0123456789abcdef0123456789abcdef").unwrap().is_fallback());
    }
}
