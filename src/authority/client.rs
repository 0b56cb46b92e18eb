//! HTTP client for the queue agent running next to MPD

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::error::AuthorityError;
use super::model::{AdvanceOutcome, AdvanceRequest, AdvanceResponse, NowPlaying};
use super::QueueAuthority;
use crate::config::AuthorityConfig;

/// Header carrying the shared secret on mutation calls
pub const SHARED_KEY_HEADER: &str = "X-Queue-Key";

/// Queue authority reached over HTTP
#[derive(Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: Url,
    shared_secret: String,
}

impl HttpAuthority {
    /// Build a client from configuration.
    ///
    /// Missing or unparsable settings are configuration errors and fail here,
    /// at startup, rather than on the first player event.
    pub fn from_config(config: &AuthorityConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("queue authority base URL is not configured (authority.base_url)"))?;
        let shared_secret = config
            .shared_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!("queue authority shared secret is not configured (authority.shared_secret)")
            })?;

        Self::new(
            base_url,
            shared_secret,
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn new(base_url: &str, shared_secret: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid queue authority URL: {}", base_url))?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            shared_secret: shared_secret.to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthorityError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthorityError::Malformed(format!("bad endpoint {}: {}", path, e)))
    }
}

#[async_trait]
impl QueueAuthority for HttpAuthority {
    async fn now_playing(&self) -> Result<Option<NowPlaying>, AuthorityError> {
        let url = self.endpoint("now-playing")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AuthorityError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await.map_err(AuthorityError::from_reqwest)?;
        if value.is_null() || value.as_object().is_some_and(|o| o.is_empty()) {
            debug!("Queue authority reports no current head");
            return Ok(None);
        }

        let snapshot: NowPlaying = serde_json::from_value(value)
            .map_err(|e| AuthorityError::Malformed(e.to_string()))?;

        debug!(
            track_id = %snapshot.track_id,
            queue_position = ?snapshot.queue_position,
            "Queue authority head"
        );

        Ok(snapshot.has_head().then_some(snapshot))
    }

    async fn advance(
        &self,
        queue_position: u32,
        track_id: Option<&str>,
    ) -> Result<AdvanceOutcome, AuthorityError> {
        let url = self.endpoint("queue/advance")?;
        let body = AdvanceRequest {
            queue_position,
            track_id: track_id.map(str::to_string),
        };

        debug!(queue_position, track_id = ?track_id, "Queue advance request");

        let response = self
            .client
            .post(url)
            .header(SHARED_KEY_HEADER, &self.shared_secret)
            .json(&body)
            .send()
            .await
            .map_err(AuthorityError::from_reqwest)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthorityError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: AdvanceResponse = response
            .json()
            .await
            .map_err(|e| AuthorityError::Malformed(e.to_string()))?;

        if !data.ok {
            return Err(AuthorityError::Rejected(
                data.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(AdvanceOutcome {
            primed_only: data.primed_only,
            now_playing: data.now_playing.filter(NowPlaying::has_head),
        })
    }
}
