//! HTTP API handlers for the player webhook

use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::engine::{Directive, EngineStatus, IntentRequest, PlayerEvent, SyncEngine};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
        }
    }
}

/// Directives for the player; empty means "do nothing"
#[derive(Debug, Default, Serialize)]
pub struct DirectivesResponse {
    pub directives: Vec<Directive>,
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub uptime_secs: u64,
    pub engine: EngineStatus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/player/events", post(player_event_handler))
        .route("/player/intents", post(player_intent_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "voice-queue-bridge",
        version: env!("QSYNC_VERSION"),
        git_sha: env!("QSYNC_GIT_SHA"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        engine: state.engine.status(),
    })
}

/// POST /player/events - Player lifecycle event.
///
/// Always answers 200: an error response would end the player's session,
/// so unreadable bodies and unknown event types get an empty directive list.
pub async fn player_event_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<DirectivesResponse> {
    let event = match serde_json::from_slice::<PlayerEvent>(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unreadable player event, ignoring");
            return Json(DirectivesResponse::default());
        }
    };

    let directives = match event.into_lifecycle() {
        Some(event) => state.engine.handle_event(event).await,
        None => Vec::new(),
    };

    Json(DirectivesResponse { directives })
}

/// POST /player/intents - Spoken intent (play, resume, next, pause, stop)
pub async fn player_intent_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<DirectivesResponse> {
    let request = match serde_json::from_slice::<IntentRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Unreadable intent request, ignoring");
            return Json(DirectivesResponse::default());
        }
    };

    Json(DirectivesResponse {
        directives: state.engine.handle_intent(request.intent).await,
    })
}
