//! HTTP routes of the queue agent

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::QueueAgent;
use crate::authority::{AdvanceRequest, AdvanceResponse, SHARED_KEY_HEADER};

#[derive(Clone)]
pub struct AgentState {
    pub agent: Arc<QueueAgent>,
    /// Hex SHA-256 of the shared secret
    secret_digest: String,
}

impl AgentState {
    pub fn new(agent: Arc<QueueAgent>, shared_secret: &str) -> Self {
        Self {
            agent,
            secret_digest: digest(shared_secret),
        }
    }

    /// Compare digests so the check does not short-circuit on the raw secret
    fn authorized(&self, presented: Option<&str>) -> bool {
        presented.is_some_and(|key| digest(key) == self.secret_digest)
    }
}

fn digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/now-playing", get(now_playing_handler))
        .route("/queue/advance", post(advance_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /now-playing - Current head, `{}` when nothing is selected
pub async fn now_playing_handler(State(state): State<AgentState>) -> Response {
    match state.agent.now_playing().await {
        Ok(Some(now_playing)) => Json(now_playing).into_response(),
        Ok(None) => Json(json!({})).into_response(),
        Err(e) => {
            warn!(error = %e, "now-playing read failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// POST /queue/advance - Advance-and-prime
pub async fn advance_handler(
    State(state): State<AgentState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
    Json(request): Json<AdvanceRequest>,
) -> Response {
    let presented = headers
        .get(SHARED_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.key.as_deref());
    if !state.authorized(presented) {
        warn!(
            queue_position = request.queue_position,
            "Rejected advance with missing or wrong key"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(AdvanceResponse {
                ok: false,
                error: Some("unauthorized".to_string()),
                ..Default::default()
            }),
        )
            .into_response();
    }

    match state
        .agent
        .advance(request.queue_position, request.track_id.as_deref())
        .await
    {
        Ok(outcome) => {
            info!(
                queue_position = request.queue_position,
                primed_only = outcome.primed_only,
                "Advance complete"
            );
            Json(AdvanceResponse {
                ok: true,
                primed_only: outcome.primed_only,
                now_playing: outcome.now_playing,
                error: None,
            })
            .into_response()
        }
        Err(e) => {
            warn!(
                queue_position = request.queue_position,
                error = %e,
                "Advance failed"
            );
            (
                StatusCode::BAD_GATEWAY,
                Json(AdvanceResponse {
                    ok: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }),
            )
                .into_response()
        }
    }
}
