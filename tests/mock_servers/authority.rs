//! Mock queue authority
//!
//! Serves `GET /now-playing` and `POST /queue/advance` over an in-memory queue.
//! Advance follows the agent's contract: delete the entry when it still holds
//! the expected file, then re-select the entry now at that position.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub const MOCK_KEY: &str = "test-key";

struct MockAuthorityState {
    queue: Vec<String>,
    current: Option<usize>,
    /// Bodies of every authenticated advance call, in order
    advance_calls: Vec<Value>,
    /// Answer this many advances with 500 before behaving
    failures_remaining: u32,
    /// Accept advances without changing the queue
    frozen: bool,
}

pub struct MockQueueAuthority {
    addr: SocketAddr,
    state: Arc<RwLock<MockAuthorityState>>,
    handle: JoinHandle<()>,
}

impl MockQueueAuthority {
    /// Start a mock authority on a random port with `queue`, head at `current`
    pub async fn start(queue: &[&str], current: Option<usize>) -> Self {
        let state = Arc::new(RwLock::new(MockAuthorityState {
            queue: queue.iter().map(|s| s.to_string()).collect(),
            current,
            advance_calls: Vec::new(),
            failures_remaining: 0,
            frozen: false,
        }));

        let app = Router::new()
            .route("/now-playing", get(handle_now_playing))
            .route("/queue/advance", post(handle_advance))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn advance_calls(&self) -> Vec<Value> {
        self.state.read().await.advance_calls.clone()
    }

    pub async fn queue(&self) -> Vec<String> {
        self.state.read().await.queue.clone()
    }

    pub async fn fail_next_advances(&self, count: u32) {
        self.state.write().await.failures_remaining = count;
    }

    pub async fn set_frozen(&self, frozen: bool) {
        self.state.write().await.frozen = frozen;
    }

    pub async fn stop(self) {
        self.handle.abort();
    }
}

fn head(state: &MockAuthorityState) -> Value {
    match state.current.and_then(|i| state.queue.get(i).map(|f| (i, f))) {
        Some((pos, file)) => json!({
            "file": file,
            "songpos": pos.to_string(),
            "title": "",
            "artist": "Mock Artist",
            "album": "Mock Album",
            "elapsed": "0.000",
            "duration": "180.000"
        }),
        None => json!({}),
    }
}

async fn handle_now_playing(State(state): State<Arc<RwLock<MockAuthorityState>>>) -> Json<Value> {
    let state = state.read().await;
    Json(head(&state))
}

async fn handle_advance(
    State(state): State<Arc<RwLock<MockAuthorityState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if headers.get("x-queue-key").and_then(|v| v.to_str().ok()) != Some(MOCK_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "unauthorized"})),
        );
    }

    let mut state = state.write().await;
    state.advance_calls.push(body.clone());

    if state.failures_remaining > 0 {
        state.failures_remaining -= 1;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": "mpd unavailable"})),
        );
    }

    let pos = body["queuePosition"].as_u64().unwrap() as usize;
    let expected = body["trackId"].as_str();
    let matches = !state.frozen
        && state
            .queue
            .get(pos)
            .is_some_and(|file| expected.map_or(true, |e| e == file));

    if matches {
        state.queue.remove(pos);
        state.current = (pos < state.queue.len()).then_some(pos);
    }

    let now_playing = head(&state);
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "primedOnly": !matches,
            "nowPlaying": now_playing
        })),
    )
}
