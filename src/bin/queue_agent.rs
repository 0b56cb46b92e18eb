//! Queue agent
//!
//! Runs next to MPD and serves `GET /now-playing` and `POST /queue/advance`
//! for the bridge.

use voice_queue_bridge::{agent, config, shutdown_signal};

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_queue_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting queue agent v{}", env!("QSYNC_VERSION"));

    let config = config::load_agent_config()?;
    config.validate()?;
    let secret = config
        .shared_secret
        .as_deref()
        .ok_or_else(|| anyhow!("agent.shared_secret is required (QUEUE_SHARED_KEY)"))?;

    let queue_agent = Arc::new(agent::QueueAgent::from_config(&config));
    tracing::info!("MPD at {}", queue_agent.mpd_addr());

    match queue_agent.now_playing().await {
        Ok(Some(np)) => tracing::info!("MPD reachable, current: {}", np.track_id),
        Ok(None) => tracing::info!("MPD reachable, nothing selected"),
        Err(e) => tracing::warn!("MPD not reachable yet: {}", e),
    }

    let app = agent::router(agent::AgentState::new(queue_agent, secret));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}
