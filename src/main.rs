//! Voice Queue Bridge
//!
//! Player webhook that keeps a voice-assistant audio player in step with the
//! queue authority.

use voice_queue_bridge::{api, authority, config, engine, guards, reader, shutdown_signal};

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Headroom over the HTTP client timeout for the engine-side bound
const CALL_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_queue_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Voice Queue Bridge v{} ({})",
        env!("QSYNC_VERSION"),
        env!("QSYNC_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    config.validate()?;
    tracing::info!("Configuration loaded, port: {}", config.port);

    let authority = Arc::new(authority::HttpAuthority::from_config(&config.authority)?);
    tracing::info!("Queue authority at {}", authority.base_url());

    let ledger: Arc<dyn guards::Ledger> = match config.dedup.redis_url.as_deref() {
        Some(url) if !url.is_empty() => Arc::new(guards::RedisLedger::open(
            url,
            Duration::from_millis(config.dedup.redis_timeout_ms),
        )?),
        _ => Arc::new(guards::InMemoryLedger::new()),
    };
    let guards = guards::Guards::new(ledger, guards::GuardWindows::from(&config.dedup));
    tracing::info!("Dedup ledger: {}", guards.backend());

    let stream_base = config
        .stream
        .base_url
        .as_deref()
        .ok_or_else(|| anyhow!("stream.base_url is required (STREAM_BASE_URL)"))?;
    let directives =
        engine::DirectiveBuilder::new(stream_base, config.stream.fallback_art_url.clone())?;

    let engine = Arc::new(engine::SyncEngine::new(
        authority,
        reader::ReaderTiming::from(&config.reader),
        guards,
        directives,
        Duration::from_millis(config.authority.timeout_ms) + CALL_TIMEOUT_MARGIN,
    ));

    let app = api::router(api::AppState::new(engine));

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}
