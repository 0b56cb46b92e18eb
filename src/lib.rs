//! Voice Queue Bridge
//!
//! Keeps a voice-assistant audio player in step with an MPD-backed queue.
//!
//! This library provides:
//! - Playback token codec for queue slots
//! - Queue authority client and a stabilized now-playing reader
//! - Dedup guards over an in-memory or Redis ledger
//! - The synchronization engine and its player webhook
//! - The queue agent that fronts MPD

pub mod agent;
pub mod api;
pub mod authority;
pub mod config;
pub mod engine;
pub mod guards;
pub mod reader;
pub mod token;

use tokio::signal;

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
