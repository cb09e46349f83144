//! OAuth2 credential record for the authenticated YouTube API paths.
//!
//! The record is stored in Google's "authorized user" JSON layout so token
//! files written by other Google tooling load unchanged.  Acquisition is a
//! one-time interactive flow (see the `stream-watchdog-auth` binary); after
//! that the daemon only refreshes the access token when it expires.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const YOUTUBE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Missing refresh token - re-run the authentication tool")]
    MissingRefreshToken,

    #[error("Token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("Client secret file has neither an \"installed\" nor a \"web\" section")]
    InvalidClientSecret,

    #[error("Redirect URL carries no authorization code: {0}")]
    MissingCode(String),

    #[error("Invalid URL: {0}")]
    Url(String),
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

/// Persisted credential.  Field names follow Google's authorized-user format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRecord {
    /// Current access token.
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) <= now,
            None => self.token.is_empty(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, path: &Path) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| AuthError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// One section of a downloaded `client_secret.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|source| AuthError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ClientSecretFile = serde_json::from_str(&content)?;
        file.installed
            .or(file.web)
            .ok_or(AuthError::InvalidClientSecret)
    }

    /// Consent page URL for the installed-app flow.
    pub fn authorization_url(&self, redirect_uri: &str) -> Result<String, AuthError> {
        let url = Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", YOUTUBE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::Url(e.to_string()))?;
        Ok(url.to_string())
    }

    /// Trade an authorization code for a full credential record.
    pub async fn exchange_code(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CredentialRecord, AuthError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        let response = post_token_request(client, &self.token_uri, &params).await?;
        Ok(CredentialRecord {
            token: response.access_token,
            refresh_token: response.refresh_token,
            token_uri: self.token_uri.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: vec![YOUTUBE_SCOPE.to_string()],
            expiry: response.expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }
}

/// Pull the `code` query parameter out of the URL the browser was redirected to.
pub fn extract_code(redirect_url: &str) -> Result<String, AuthError> {
    let url = Url::parse(redirect_url.trim()).map_err(|e| AuthError::Url(e.to_string()))?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AuthError::MissingCode(redirect_url.to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

async fn post_token_request(
    client: &Client,
    token_uri: &str,
    params: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let response = client.post(token_uri).form(params).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// A loaded credential that refreshes itself and persists the result.
pub struct OAuthSession {
    record: Mutex<CredentialRecord>,
    path: PathBuf,
    client: Client,
}

impl OAuthSession {
    pub fn load(path: impl Into<PathBuf>, client: Client) -> Result<Self, AuthError> {
        let path = path.into();
        let record = CredentialRecord::load(&path)?;
        if record.refresh_token.is_none() {
            return Err(AuthError::MissingRefreshToken);
        }
        Ok(Self {
            record: Mutex::new(record),
            path,
            client,
        })
    }

    /// A currently valid access token, refreshing first if necessary.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut record = self.record.lock().await;
        if record.needs_refresh(Utc::now()) {
            self.refresh_locked(&mut record).await?;
        }
        Ok(record.token.clone())
    }

    async fn refresh_locked(&self, record: &mut CredentialRecord) -> Result<(), AuthError> {
        info!("Refreshing expired OAuth credentials...");
        let refresh_token = record
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        let params = [
            ("client_id", record.client_id.as_str()),
            ("client_secret", record.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = post_token_request(&self.client, &record.token_uri, &params).await?;

        record.token = response.access_token;
        record.expiry = response
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));
        // Google only returns a new refresh token when it rotates it.
        if let Some(rotated) = response.refresh_token {
            record.refresh_token = Some(rotated);
        }

        record.save(&self.path).await?;
        debug!("OAuth credentials saved to {:?}", self.path);
        Ok(())
    }
}
