use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use super::protocol::{DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_FAST_POLL_TIMEOUT_MINUTES};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub youtube: YouTubeConfig,
    #[serde(default)]
    pub obs: ObsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Use the stored OAuth credential for live checks and broadcast resets.
    #[serde(default)]
    pub oauth_enabled: bool,
    #[serde(default = "default_client_secret_file")]
    pub client_secret_file: PathBuf,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsConfig {
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    /// Empty when the obs-websocket server has authentication disabled.
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served at `/` (index.html, static/, locales/).
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_fast_poll_timeout")]
    pub fast_poll_timeout_minutes: u64,
    /// Pause between stopping a zombie stream and starting it again.
    #[serde(default = "default_zombie_delay")]
    pub zombie_restart_delay_secs: u64,
    /// Pause between broadcast lifecycle transitions.
    #[serde(default = "default_reset_delay")]
    pub broadcast_reset_delay_secs: u64,
    /// Pause before re-reading the encoder status after a start command.
    #[serde(default = "default_settle_delay")]
    pub start_settle_delay_secs: u64,
}

impl WatchdogConfig {
    pub fn zombie_restart_delay(&self) -> Duration {
        Duration::from_secs(self.zombie_restart_delay_secs)
    }

    pub fn broadcast_reset_delay(&self) -> Duration {
        Duration::from_secs(self.broadcast_reset_delay_secs)
    }

    pub fn start_settle_delay(&self) -> Duration {
        Duration::from_secs(self.start_settle_delay_secs)
    }
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            channel_id: String::new(),
            api_base: default_api_base(),
            oauth_enabled: false,
            client_secret_file: default_client_secret_file(),
            token_file: default_token_file(),
        }
    }
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: String::new(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
            static_dir: None,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            fast_poll_timeout_minutes: default_fast_poll_timeout(),
            zombie_restart_delay_secs: default_zombie_delay(),
            broadcast_reset_delay_secs: default_reset_delay(),
            start_settle_delay_secs: default_settle_delay(),
        }
    }
}

fn default_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_client_secret_file() -> PathBuf {
    PathBuf::from("client_secret.json")
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_obs_host() -> String {
    "localhost".to_string()
}

fn default_obs_port() -> u16 {
    4455
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_fast_poll_timeout() -> u64 {
    DEFAULT_FAST_POLL_TIMEOUT_MINUTES
}

fn default_zombie_delay() -> u64 {
    5
}

fn default_reset_delay() -> u64 {
    3
}

fn default_settle_delay() -> u64 {
    2
}

/// Env values are often written as `KEY='value'` in .env files.
fn strip_quotes(value: &str) -> String {
    value.trim().trim_matches(|c| c == '\'' || c == '"').to_string()
}

impl Config {
    /// Load `config.toml` (writing defaults on first run), then apply
    /// `.env` / environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            config.save()?;
            config
        };

        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Override settings from environment-style variables.  Unparsable
    /// values are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| strip_quotes(&v));

        if let Some(v) = get("YOUTUBE_API_KEY") {
            self.youtube.api_key = v;
        }
        if let Some(v) = get("YOUTUBE_CHANNEL_ID") {
            self.youtube.channel_id = v;
        }
        if let Some(v) = get("OAUTH_ENABLED") {
            self.youtube.oauth_enabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("OBS_WEBSOCKET_HOST") {
            self.obs.host = v;
        }
        if let Some(v) = get("OBS_WEBSOCKET_PORT") {
            match v.parse() {
                Ok(port) => self.obs.port = port,
                Err(_) => tracing::warn!("Ignoring invalid OBS_WEBSOCKET_PORT {:?}", v),
            }
        }
        if let Some(v) = get("OBS_WEBSOCKET_PASSWORD") {
            self.obs.password = v;
        }
    }

    /// Whether the API-key based live check has what it needs.
    pub fn has_api_key(&self) -> bool {
        let key = self.youtube.api_key.trim();
        !key.is_empty() && !key.contains("YOUR_YOUTUBE")
    }

    /// Names of required settings that are absent.  The daemon still runs
    /// when this is non-empty, but remote sampling is skipped.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.youtube.channel_id.trim().is_empty() {
            missing.push("YOUTUBE_CHANNEL_ID");
        }
        if !self.has_api_key() && !self.youtube.oauth_enabled {
            missing.push("YOUTUBE_API_KEY");
        }
        missing
    }
}
