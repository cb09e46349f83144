//! obs-websocket (protocol v5) control client.
//!
//! Every call is a complete session:
//!
//! ```text
//!   connect ──► Hello (op 0) ──► Identify (op 1) ──► Identified (op 2)
//!           ──► Request (op 6) ──► RequestResponse (op 7, same requestId)
//!           ──► close
//! ```
//!
//! There is no pooled connection.  The socket is closed on every path,
//! including errors, and only one call is ever in flight because the
//! reconciliation loop is the sole caller.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info};

use watchdog_proto::config::ObsConfig;

// ── protocol constants ────────────────────────────────────────────────────────

const RPC_VERSION: u32 = 1;

const OP_HELLO: u8 = 0;
const OP_IDENTIFY: u8 = 1;
const OP_IDENTIFIED: u8 = 2;
const OP_REQUEST: u8 = 6;
const OP_REQUEST_RESPONSE: u8 = 7;

/// Close code obs-websocket uses when the Identify auth string is wrong.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

const PHASE_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum ObsError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Connection closed by OBS: {0}")]
    Closed(String),

    #[error("OBS rejected the websocket password")]
    AuthenticationFailed,

    #[error("OBS requires a websocket password but none is configured")]
    PasswordRequired,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{request_type} failed with code {code}: {comment}")]
    RequestFailed {
        request_type: String,
        code: i64,
        comment: String,
    },
}

/// Control surface of the local encoder.
#[async_trait]
pub trait EncoderControl: Send + Sync {
    /// Whether the encoder's stream output is active.
    async fn get_streaming(&self) -> Result<bool, ObsError>;
    async fn start_stream(&self) -> Result<(), ObsError>;
    async fn stop_stream(&self) -> Result<(), ObsError>;
}

#[derive(Debug, Deserialize)]
struct OpMessage {
    op: u8,
    #[serde(default)]
    d: Value,
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

#[derive(Debug, Clone)]
pub struct ObsClient {
    host: String,
    port: u16,
    password: String,
}

impl ObsClient {
    pub fn new(config: &ObsConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
        }
    }

    fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Run one request in its own session and return its `responseData`.
    pub async fn call(&self, request_type: &str) -> Result<Value, ObsError> {
        let url = self.url();
        let (mut ws, _) = timeout(PHASE_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| ObsError::Timeout("connect"))??;
        debug!("obs: connected to {}", url);

        let result = self.session(&mut ws, request_type).await;

        close_quietly(&mut ws).await;
        result
    }

    async fn session<S>(&self, ws: &mut S, request_type: &str) -> Result<Value, ObsError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin,
    {
        let hello = expect_op(ws, OP_HELLO, "hello").await?;

        let mut identify = json!({
            "rpcVersion": RPC_VERSION,
            "eventSubscriptions": 0,
        });
        if let Some(auth) = hello.get("authentication") {
            if self.password.is_empty() {
                return Err(ObsError::PasswordRequired);
            }
            let challenge = auth["challenge"].as_str().unwrap_or_default();
            let salt = auth["salt"].as_str().unwrap_or_default();
            identify["authentication"] = json!(auth_response(&self.password, salt, challenge));
        }
        send_op(ws, OP_IDENTIFY, identify).await?;
        expect_op(ws, OP_IDENTIFIED, "identify").await?;

        let request_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed).to_string();
        send_op(
            ws,
            OP_REQUEST,
            json!({ "requestType": request_type, "requestId": request_id }),
        )
        .await?;
        debug!("obs: sent {} req={}", request_type, request_id);

        loop {
            let response = expect_op(ws, OP_REQUEST_RESPONSE, "request").await?;
            if response["requestId"].as_str() != Some(request_id.as_str()) {
                debug!("obs: response for unknown req={}", response["requestId"]);
                continue;
            }
            let status = &response["requestStatus"];
            if status["result"].as_bool() != Some(true) {
                return Err(ObsError::RequestFailed {
                    request_type: request_type.to_string(),
                    code: status["code"].as_i64().unwrap_or_default(),
                    comment: status["comment"].as_str().unwrap_or_default().to_string(),
                });
            }
            return Ok(response
                .get("responseData")
                .cloned()
                .unwrap_or(Value::Null));
        }
    }
}

async fn send_op<S>(ws: &mut S, op: u8, d: Value) -> Result<(), ObsError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let payload = serde_json::to_string(&json!({ "op": op, "d": d }))?;
    timeout(PHASE_TIMEOUT, ws.send(Message::text(payload)))
        .await
        .map_err(|_| ObsError::Timeout("send"))??;
    Ok(())
}

/// Read until a message with opcode `op` arrives and return its `d` payload.
/// Messages with other opcodes (events) are skipped.
async fn expect_op<S>(ws: &mut S, op: u8, phase: &'static str) -> Result<Value, ObsError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let next = timeout(PHASE_TIMEOUT, ws.next())
            .await
            .map_err(|_| ObsError::Timeout(phase))?;
        match next {
            None => return Err(ObsError::Closed(format!("stream ended during {}", phase))),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => {
                let message: OpMessage = serde_json::from_str(text.as_str())?;
                if message.op == op {
                    return Ok(message.d);
                }
                debug!("obs: skipping op {} while waiting for op {}", message.op, op);
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(match frame {
                    Some(f) if u16::from(f.code) == CLOSE_AUTHENTICATION_FAILED => {
                        ObsError::AuthenticationFailed
                    }
                    Some(f) => ObsError::Closed(format!("{} {}", u16::from(f.code), f.reason.as_str())),
                    None => ObsError::Closed(format!("closed during {}", phase)),
                });
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(ObsError::Protocol(
                    "binary frames (msgpack) are not supported".to_string(),
                ))
            }
            Some(Ok(_)) => {}
        }
    }
}

#[async_trait]
impl EncoderControl for ObsClient {
    async fn get_streaming(&self) -> Result<bool, ObsError> {
        let data = self.call("GetStreamStatus").await?;
        Ok(data["outputActive"].as_bool().unwrap_or(false))
    }

    async fn start_stream(&self) -> Result<(), ObsError> {
        self.call("StartStream").await?;
        info!("StartStream command sent to OBS.");
        Ok(())
    }

    async fn stop_stream(&self) -> Result<(), ObsError> {
        self.call("StopStream").await?;
        info!("StopStream command sent to OBS.");
        Ok(())
    }
}

/// Best effort: the server may already have closed the socket, or stopped
/// reading from it.
async fn close_quietly<S>(ws: &mut S)
where
    S: Sink<Message> + Unpin,
{
    if timeout(PHASE_TIMEOUT, ws.close()).await.is_err() {
        debug!("obs: close timed out, dropping the socket");
    }
}
