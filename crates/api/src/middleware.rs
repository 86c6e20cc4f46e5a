//! API middleware and shared state.

#![allow(missing_docs)]

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use unirank_common::AppError;
use unirank_common::AppResult;
use unirank_common::config::{IdentityConfig, VotingConfig};
use unirank_core::{
    AggregatorService, DeviceSignals, EventPublisher, FallbackSignals, GateService, Identity,
    IdentityService, InvalidationBus, LedgerService, MemoryIdentityCache, PollService, PollStore,
    ProgressStore, SignalSource, SyncConfig,
};

use crate::extractors::ResolvedIdentity;

/// Header carrying an identity token for clients that cannot keep cookies.
pub const IDENTITY_HEADER: &str = "x-voter-identity";
/// Header carrying the device signal composite as a JSON object.
pub const DEVICE_SIGNALS_HEADER: &str = "x-device-signals";
/// Header carrying the screen geometry, e.g. `1920x1080`.
pub const SCREEN_HEADER: &str = "x-screen";

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub poll_service: PollService,
    pub ledger_service: LedgerService,
    pub aggregator: Arc<AggregatorService>,
    pub gate_service: GateService,
    pub identity_service: IdentityService,
    pub bus: InvalidationBus,
    pub identity_config: IdentityConfig,
    pub sync_config: SyncConfig,
    /// Bearer token for poll administration; `None` refuses it entirely.
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    /// Wire every service onto one store, progress mirror and bus.
    #[must_use]
    pub fn new(
        store: Arc<dyn PollStore>,
        progress: Arc<dyn ProgressStore>,
        publisher: Arc<dyn EventPublisher>,
        bus: InvalidationBus,
        voting: &VotingConfig,
        identity: IdentityConfig,
    ) -> Self {
        Self {
            poll_service: PollService::new(
                store.clone(),
                bus.clone(),
                publisher.clone(),
                voting.max_options,
            ),
            ledger_service: LedgerService::new(
                store.clone(),
                bus.clone(),
                publisher,
                progress.clone(),
            ),
            aggregator: Arc::new(AggregatorService::new(store.clone())),
            gate_service: GateService::new(store, progress, voting.category_gate_policy),
            identity_service: IdentityService::new(identity.salt.clone()),
            bus,
            identity_config: identity,
            sync_config: SyncConfig::from(voting),
            admin_token: None,
        }
    }

    /// Allow poll administration for holders of `token`.
    #[must_use]
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }
}

/// Identity signals read from request headers.
#[derive(Debug, Clone, Default)]
pub struct HeaderSignals {
    device: Option<String>,
    fallback: FallbackSignals,
}

impl HeaderSignals {
    /// Capture the signal headers of a request.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let locale = text(header::ACCEPT_LANGUAGE.as_str())
            .split(',')
            .next()
            .map(|tag| tag.split(';').next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();

        let device = Some(text(DEVICE_SIGNALS_HEADER)).filter(|v| !v.is_empty());

        Self {
            device,
            fallback: FallbackSignals {
                user_agent: text(header::USER_AGENT.as_str()),
                locale,
                screen: text(SCREEN_HEADER),
            },
        }
    }
}

impl SignalSource for HeaderSignals {
    fn collect(&self) -> AppResult<DeviceSignals> {
        let raw = self
            .device
            .as_deref()
            .ok_or_else(|| AppError::IdentityUnavailable("no device signals sent".to_string()))?;
        serde_json::from_str(raw)
            .map_err(|e| AppError::IdentityUnavailable(format!("unreadable device signals: {e}")))
    }

    fn fallback(&self) -> FallbackSignals {
        self.fallback.clone()
    }
}

fn presented_identity(jar: &CookieJar, headers: &HeaderMap, cookie_name: &str) -> Option<Identity> {
    let from_cookie = jar
        .get(cookie_name)
        .and_then(|cookie| Identity::parse(cookie.value()).ok());
    from_cookie.or_else(|| {
        headers
            .get(IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|token| Identity::parse(token).ok())
    })
}

/// Identity middleware.
///
/// Resolves the voter from the identity cookie, then the identity header, then
/// the request's device signals. The resolved identity is attached to the
/// request and written back as a long-lived cookie when it changed.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.identity_config;
    let jar = CookieJar::from_headers(req.headers());

    let cache = match presented_identity(&jar, req.headers(), &config.cookie_name) {
        Some(identity) => MemoryIdentityCache::with_identity(identity),
        None => MemoryIdentityCache::new(),
    };
    let signals = HeaderSignals::from_headers(req.headers());
    let identity = state.identity_service.resolve(&cache, &signals).await;

    let issued = jar
        .get(&config.cookie_name)
        .is_none_or(|cookie| cookie.value() != identity.as_str());
    req.extensions_mut().insert(ResolvedIdentity {
        identity: identity.clone(),
        issued,
    });

    let response = next.run(req).await;
    if !issued {
        return response;
    }

    let cookie = Cookie::build((config.cookie_name.clone(), identity.as_str().to_string()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookie)
        .same_site(SameSite::Lax)
        .permanent();
    (jar.add(cookie), response).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_header_signals_collect_device_composite() {
        let signals = HeaderSignals::from_headers(&headers(&[(
            DEVICE_SIGNALS_HEADER,
            r#"{"canvas":"c1","webgl":"g1","fonts":"f1"}"#,
        )]));

        let device = signals.collect().unwrap();
        assert_eq!(device.usable_components(), 3);
    }

    #[test]
    fn test_header_signals_without_device_header_are_unavailable() {
        let signals = HeaderSignals::from_headers(&headers(&[
            ("user-agent", "Mozilla/5.0"),
            ("accept-language", "de-DE,de;q=0.9,en;q=0.8"),
            (SCREEN_HEADER, "1920x1080"),
        ]));

        assert!(matches!(
            signals.collect(),
            Err(AppError::IdentityUnavailable(_))
        ));
        let fallback = signals.fallback();
        assert_eq!(fallback.user_agent, "Mozilla/5.0");
        assert_eq!(fallback.locale, "de-DE");
        assert_eq!(fallback.screen, "1920x1080");
    }

    #[test]
    fn test_garbled_device_header_is_unavailable() {
        let signals = HeaderSignals::from_headers(&headers(&[(DEVICE_SIGNALS_HEADER, "{nope")]));
        assert!(matches!(
            signals.collect(),
            Err(AppError::IdentityUnavailable(_))
        ));
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let cookie_token = format!("v1-{}", "a".repeat(32));
        let header_token = format!("fb-{}", "b".repeat(32));
        let mut map = HeaderMap::new();
        map.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("unirank_voter={cookie_token}")).unwrap(),
        );
        map.insert(IDENTITY_HEADER, HeaderValue::from_str(&header_token).unwrap());
        let jar = CookieJar::from_headers(&map);

        let identity = presented_identity(&jar, &map, "unirank_voter").unwrap();
        assert_eq!(identity.as_str(), cookie_token);

        map.remove(header::COOKIE);
        let jar = CookieJar::from_headers(&map);
        let identity = presented_identity(&jar, &map, "unirank_voter").unwrap();
        assert_eq!(identity.as_str(), header_token);
    }

    #[test]
    fn test_malformed_tokens_are_ignored() {
        let map = headers(&[(IDENTITY_HEADER, "v1-not-hex")]);
        let jar = CookieJar::from_headers(&map);
        assert!(presented_identity(&jar, &map, "unirank_voter").is_none());
    }
}
