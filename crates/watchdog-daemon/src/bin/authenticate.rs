//! One-time YouTube OAuth2 setup.
//!
//! Run on any machine with a browser, then copy the written token file to
//! the host running the watchdog.

use anyhow::Context;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use watchdog_proto::config::Config;
use watchdog_proto::oauth::{extract_code, ClientSecret, CredentialRecord, OAuthSession};

const REDIRECT_URI: &str = "http://localhost:8080";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = Config::load()?;
    let secret_path = &config.youtube.client_secret_file;
    let token_path = &config.youtube.token_file;
    let client = reqwest::Client::new();

    println!("Stream Watchdog - YouTube OAuth2 authentication");
    println!();

    if token_path.exists() {
        match CredentialRecord::load(token_path) {
            Ok(record) if !record.needs_refresh(Utc::now()) => {
                println!("{:?} already holds valid credentials. Nothing to do.", token_path);
                return Ok(());
            }
            Ok(_) => {
                println!("Existing credentials have expired; refreshing...");
                let refreshed = match OAuthSession::load(token_path, client.clone()) {
                    Ok(session) => session.access_token().await.map(|_| ()),
                    Err(e) => Err(e),
                };
                match refreshed {
                    Ok(()) => {
                        println!("Credentials refreshed and saved to {:?}.", token_path);
                        return Ok(());
                    }
                    Err(e) => warn!("Refresh failed, starting a new authorization: {}", e),
                }
            }
            Err(e) => warn!("Ignoring unreadable {:?}: {}", token_path, e),
        }
    }

    let secret = ClientSecret::load(secret_path).with_context(|| {
        format!(
            "Could not read {:?}. Create an OAuth client ID (Desktop app) at \
             https://console.cloud.google.com/apis/credentials and download its JSON.",
            secret_path
        )
    })?;

    println!("1. Open this URL in a browser and grant access:");
    println!();
    println!("   {}", secret.authorization_url(REDIRECT_URI)?);
    println!();
    println!("2. The browser is then sent to {} (the page will not load).", REDIRECT_URI);
    println!("   Copy the full address from the address bar and paste it here:");
    println!();

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read the redirect URL")?;
    let code = extract_code(&line)?;

    let record = secret.exchange_code(&client, &code, REDIRECT_URI).await?;
    if record.refresh_token.is_none() {
        warn!("No refresh token was issued; revoke the app's access and run this again.");
    }
    record.save(token_path).await?;

    println!();
    println!("Credentials saved to {:?}.", token_path);
    println!("Set OAUTH_ENABLED=true for the watchdog to use them.");
    Ok(())
}
