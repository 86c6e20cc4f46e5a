//! Unirank server entry point.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use unirank_api::{AppState, router as api_router};
use unirank_common::{AppError, Config, RetryConfig, retry_with_backoff};
use unirank_core::{
    DatabasePollStore, EventPublisher, InvalidationBus, MemoryProgressStore, NoOpEventPublisher,
    ProgressStore,
};
use unirank_pubsub::{PubSubInvalidationBridge, RedisProgressCache, RedisPubSub};

/// How often idle per-poll invalidation channels are dropped.
const BUS_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Install the tracing subscriber. `UNIRANK_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let json = std::env::var("UNIRANK_LOG_JSON").is_ok_and(|v| v == "1");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "unirank=debug,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Realtime wiring: cross-instance fan-out and the progress mirror.
struct Realtime {
    publisher: Arc<dyn EventPublisher>,
    progress: Arc<dyn ProgressStore>,
    pubsub: Option<Arc<RedisPubSub>>,
}

async fn connect_realtime(config: &Config, bus: &InvalidationBus) -> anyhow::Result<Realtime> {
    let Some(redis) = &config.redis else {
        info!("Redis not configured, realtime invalidation stays process-local");
        return Ok(Realtime {
            publisher: Arc::new(NoOpEventPublisher),
            progress: Arc::new(MemoryProgressStore::new()),
            pubsub: None,
        });
    };

    info!("Connecting to Redis...");
    let pubsub = retry_with_backoff(&RetryConfig::startup(), "connect redis", move || async move {
        RedisPubSub::new(&redis.url)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    })
    .await?;
    pubsub
        .start()
        .await
        .map_err(|e| AppError::Redis(e.to_string()))?;
    let pubsub = Arc::new(pubsub);

    PubSubInvalidationBridge::new(&pubsub, bus.clone()).start();
    let progress = RedisProgressCache::with_ttl(
        Arc::new(pubsub.client().clone()),
        redis.prefix.clone(),
        Duration::from_secs(redis.progress_ttl_secs),
    );
    info!("Connected to Redis");

    Ok(Realtime {
        publisher: pubsub.clone(),
        progress: Arc::new(progress),
        pubsub: Some(pubsub),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting unirank server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = retry_with_backoff(&RetryConfig::startup(), "connect database", || {
        unirank_db::init(&config.database)
    })
    .await?;
    info!("Connected to database");

    // Run migrations
    let applied = unirank_db::migrate(&db).await?;
    info!(applied, "Database schema up to date");

    let bus = InvalidationBus::new();
    let realtime = connect_realtime(&config, &bus).await?;

    let cleanup_bus = bus.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BUS_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            cleanup_bus.cleanup().await;
        }
    });

    let state = AppState::new(
        Arc::new(DatabasePollStore::new(Arc::new(db))),
        realtime.progress,
        realtime.publisher,
        bus,
        &config.voting,
        config.identity.clone(),
    )
    .with_admin_token(config.admin.token.clone());
    if config.admin.token.is_none() {
        warn!("No admin token configured, poll creation and closing are disabled");
    }

    // Build router
    let app = api_router(state)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(pubsub) = realtime.pubsub {
        if let Err(e) = pubsub.shutdown().await {
            warn!(error = %e, "Redis Pub/Sub shutdown failed");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
