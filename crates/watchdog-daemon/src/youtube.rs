//! YouTube Data API v3 client: channel live status and live-broadcast
//! lifecycle calls.

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use watchdog_proto::oauth::{AuthError, OAuthSession};

use crate::broadcast::{BroadcastApi, LifecycleStatus, LiveBroadcast};

#[derive(Debug, Error)]
pub enum YouTubeError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("YouTube API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

/// Live-status lookup on the remote platform.
///
/// Implementations never fail: any authentication, network or not-found
/// problem is logged and reported as "not live".
#[async_trait]
pub trait LiveStatus: Send + Sync {
    async fn is_live(&self, channel_id: &str) -> bool;
}

#[derive(Clone)]
pub enum Credentials {
    ApiKey(String),
    OAuth(Arc<OAuthSession>),
}

impl Credentials {
    /// Pick credentials for the live-status search.  The API key wins when
    /// both are available, so a revoked OAuth grant only disables the
    /// broadcast calls and never turns every check into "offline".
    pub fn for_live_status(
        api_key: Option<String>,
        oauth: Option<Arc<OAuthSession>>,
    ) -> Option<Self> {
        match (api_key, oauth) {
            (Some(key), _) => Some(Credentials::ApiKey(key)),
            (None, Some(session)) => Some(Credentials::OAuth(session)),
            (None, None) => None,
        }
    }
}

#[derive(Clone)]
pub struct YouTubeClient {
    client: Client,
    api_base: String,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct BroadcastListResponse {
    #[serde(default)]
    items: Vec<BroadcastResource>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResource {
    id: String,
    #[serde(default)]
    snippet: Option<BroadcastSnippet>,
    #[serde(default)]
    status: Option<BroadcastStatus>,
}

#[derive(Debug, Deserialize)]
struct BroadcastSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastStatus {
    #[serde(default)]
    life_cycle_status: String,
}

impl From<BroadcastResource> for LiveBroadcast {
    fn from(resource: BroadcastResource) -> Self {
        Self {
            id: resource.id,
            title: resource.snippet.map(|s| s.title).unwrap_or_default(),
            status: LifecycleStatus::from(
                resource
                    .status
                    .map(|s| s.life_cycle_status)
                    .unwrap_or_default()
                    .as_str(),
            ),
        }
    }
}

impl YouTubeClient {
    pub fn new(client: Client, api_base: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, YouTubeError> {
        Ok(match &self.credentials {
            Credentials::ApiKey(key) => request.query(&[("key", key.as_str())]),
            Credentials::OAuth(session) => request.bearer_auth(session.access_token().await?),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, YouTubeError> {
        let response = self.authorize(request).await?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("no error message")
            .to_string();
        Err(YouTubeError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Whether `channel_id` currently has a live video.
    pub async fn check_live(&self, channel_id: &str) -> Result<bool, YouTubeError> {
        let request = self.client.get(format!("{}/search", self.api_base)).query(&[
            ("part", "snippet"),
            ("channelId", channel_id),
            ("eventType", "live"),
            ("type", "video"),
        ]);
        let response: SearchResponse = self.send(request).await?.json().await?;
        Ok(!response.items.is_empty())
    }
}

#[async_trait]
impl LiveStatus for YouTubeClient {
    async fn is_live(&self, channel_id: &str) -> bool {
        match self.check_live(channel_id).await {
            Ok(true) => {
                info!("YouTube stream is currently LIVE.");
                true
            }
            Ok(false) => {
                info!("YouTube stream is currently OFFLINE.");
                false
            }
            Err(e) => {
                error!("YouTube live status check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl BroadcastApi for YouTubeClient {
    async fn list_broadcasts(&self) -> Result<Vec<LiveBroadcast>, YouTubeError> {
        let request = self
            .client
            .get(format!("{}/liveBroadcasts", self.api_base))
            .query(&[
                ("part", "id,snippet,status"),
                ("broadcastStatus", "all"),
                ("maxResults", "50"),
            ]);
        let response: BroadcastListResponse = self.send(request).await?.json().await?;
        Ok(response.items.into_iter().map(LiveBroadcast::from).collect())
    }

    async fn transition(
        &self,
        broadcast_id: &str,
        to: &LifecycleStatus,
    ) -> Result<(), YouTubeError> {
        let request = self
            .client
            .post(format!("{}/liveBroadcasts/transition", self.api_base))
            .query(&[
                ("broadcastStatus", to.as_str()),
                ("id", broadcast_id),
                ("part", "status"),
            ])
            .header(CONTENT_LENGTH, "0");
        self.send(request).await?;
        Ok(())
    }
}
