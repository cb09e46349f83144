//! HTTP and WebSocket surface for the dashboard.
//!
//! ```text
//!   GET  /ws             push channel: snapshot on connect, then every change;
//!                        inbound text frames are state patches
//!   POST /api/check-now  wake the loop (202)
//!   GET  /api/history    snapshots, oldest first
//!   GET  /api/state      current snapshot
//!   POST /api/state      apply a patch, returns the resulting snapshot
//! ```

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use watchdog_proto::protocol::{StatePatch, WatchdogState};

use crate::control::Control;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn router(control: Control, static_dir: Option<PathBuf>) -> Router {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/check-now", post(check_now))
        .route("/api/history", get(history))
        .route("/api/state", get(current_state).post(patch_state))
        .with_state(control);

    match static_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    }
}

pub fn start_server(
    bind_address: String,
    port: u16,
    control: Control,
    static_dir: Option<PathBuf>,
) -> tokio::task::JoinHandle<()> {
    let app = router(control, static_dir);

    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server on {}: {}", addr, e);
                return;
            }
        };
        info!("Dashboard listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn check_now(State(control): State<Control>) -> impl IntoResponse {
    control.trigger_check();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Check triggered" })),
    )
}

async fn history(State(control): State<Control>) -> Json<Vec<WatchdogState>> {
    Json(control.history().await)
}

async fn current_state(State(control): State<Control>) -> Json<WatchdogState> {
    Json(control.state().await)
}

async fn patch_state(State(control): State<Control>, Json(patch): Json<StatePatch>) -> Response {
    match control.apply_patch(&patch).await {
        Ok(state) => Json(state).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(control): State<Control>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, control))
}

async fn send_state<S>(sender: &mut S, state: &WatchdogState) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(state).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

async fn handle_socket(socket: WebSocket, control: Control) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so nothing falls in between.
    let mut updates = control.subscribe();

    if send_state(&mut sender, &control.state().await).await.is_err() {
        debug!("Client left before the initial snapshot");
        return;
    }
    info!("Dashboard client connected");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick fires immediately.
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<StatePatch>(&text) {
                            // Accepted changes come back through `updates`.
                            Ok(patch) => {
                                let _ = control.apply_patch(&patch).await;
                            }
                            Err(e) => warn!("Ignoring malformed patch {:?}: {}", text, e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                }
            }

            update = updates.recv() => {
                let snapshot = match update {
                    Ok(snapshot) => snapshot,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Dashboard client missed {} updates", n);
                        control.state().await
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if send_state(&mut sender, &snapshot).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!("Client missed a heartbeat, closing");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    info!("Dashboard client disconnected");
}
