mod broadcast;
mod control;
mod core;
mod http;
mod obs;
mod start;
mod youtube;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use watchdog_proto::config::Config;
use watchdog_proto::oauth::OAuthSession;
use watchdog_proto::protocol::WatchdogState;
use watchdog_proto::state::StateManager;

use crate::broadcast::BroadcastResetHelper;
use crate::control::Control;
use crate::core::Watchdog;
use crate::obs::ObsClient;
use crate::youtube::{Credentials, YouTubeClient};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let log_path = watchdog_proto::platform::log_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let stdout_layer = tracing_subscriber::fmt::layer();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stream_watchdog=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let missing = config.missing_settings();
    if !missing.is_empty() {
        error!(
            "Missing settings: {}. YouTube checks are skipped until they are set in the config file or .env.",
            missing.join(", ")
        );
    }

    let http_client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let oauth = if config.youtube.oauth_enabled {
        match OAuthSession::load(&config.youtube.token_file, http_client.clone()) {
            Ok(session) => {
                info!("OAuth credentials loaded from {:?}", config.youtube.token_file);
                Some(Arc::new(session))
            }
            Err(e) => {
                error!(
                    "OAuth credentials unavailable ({}). Run stream-watchdog-auth; broadcast reset is disabled.",
                    e
                );
                None
            }
        }
    } else {
        None
    };

    let channel_id = config.youtube.channel_id.trim().to_string();
    let api_key = config
        .has_api_key()
        .then(|| config.youtube.api_key.clone());

    let youtube = Credentials::for_live_status(api_key, oauth.clone())
        .filter(|_| !channel_id.is_empty())
        .map(|credentials| {
            Arc::new(YouTubeClient::new(
                http_client.clone(),
                config.youtube.api_base.clone(),
                credentials,
            ))
        });

    // Broadcast lifecycle calls need an OAuth grant; an API key cannot make them.
    let broadcasts = oauth
        .filter(|_| !channel_id.is_empty())
        .map(|session| {
            Arc::new(YouTubeClient::new(
                http_client.clone(),
                config.youtube.api_base.clone(),
                Credentials::OAuth(session),
            ))
        });

    if config.obs.password.is_empty() {
        warn!("No OBS websocket password configured; connecting without authentication.");
    }

    let initial = WatchdogState::new(
        config.watchdog.check_interval_secs,
        config.watchdog.fast_poll_timeout_minutes,
    );
    let state = Arc::new(StateManager::new(initial));
    let wake = Arc::new(Notify::new());

    let mut watchdog = Watchdog::new(
        state.clone(),
        wake.clone(),
        Arc::new(ObsClient::new(&config.obs)),
        channel_id,
    )
    .with_delays(
        config.watchdog.zombie_restart_delay(),
        config.watchdog.start_settle_delay(),
    );

    if let Some(youtube) = youtube {
        watchdog = watchdog.with_remote(youtube);
    }
    if let Some(broadcasts) = broadcasts {
        info!("Broadcast reset enabled.");
        watchdog = watchdog.with_reset_helper(BroadcastResetHelper::new(
            broadcasts,
            config.watchdog.broadcast_reset_delay(),
        ));
    }

    if config.http.enabled {
        http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            Control::new(state.clone(), wake.clone()),
            config.http.static_dir.clone(),
        );
    } else {
        info!("HTTP server disabled.");
    }

    watchdog.run().await;
    Ok(())
}
