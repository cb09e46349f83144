//! In-memory stand-ins for the encoder and the remote platform.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

use crate::broadcast::{BroadcastApi, LifecycleStatus, LiveBroadcast};
use crate::obs::{EncoderControl, ObsError};
use crate::youtube::{LiveStatus, YouTubeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderCall {
    Status,
    Start,
    Stop,
}

/// Records every call with the (possibly paused) tokio clock.
#[derive(Default)]
pub struct FakeEncoder {
    streaming: AtomicBool,
    unreachable: AtomicBool,
    refuse_start: AtomicBool,
    calls: Mutex<Vec<(EncoderCall, Instant)>>,
}

impl FakeEncoder {
    pub fn new(streaming: bool) -> Self {
        let encoder = Self::default();
        encoder.streaming.store(streaming, Ordering::SeqCst);
        encoder
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::SeqCst);
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Every call fails as if the encoder were not running.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Start commands are rejected; status and stop still work.
    pub fn set_refuse_start(&self, refuse: bool) {
        self.refuse_start.store(refuse, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(EncoderCall, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EncoderCall) -> usize {
        self.calls().iter().filter(|(c, _)| *c == kind).count()
    }

    /// Start/stop commands in order, without status queries.
    pub fn commands(&self) -> Vec<(EncoderCall, Instant)> {
        self.calls()
            .into_iter()
            .filter(|(c, _)| *c != EncoderCall::Status)
            .collect()
    }

    fn record(&self, call: EncoderCall) -> Result<(), ObsError> {
        self.calls.lock().unwrap().push((call, Instant::now()));
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ObsError::Closed("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EncoderControl for FakeEncoder {
    async fn get_streaming(&self) -> Result<bool, ObsError> {
        self.record(EncoderCall::Status)?;
        Ok(self.is_streaming())
    }

    async fn start_stream(&self) -> Result<(), ObsError> {
        self.record(EncoderCall::Start)?;
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(ObsError::RequestFailed {
                request_type: "StartStream".into(),
                code: 500,
                comment: "output failed to start".into(),
            });
        }
        self.set_streaming(true);
        Ok(())
    }

    async fn stop_stream(&self) -> Result<(), ObsError> {
        self.record(EncoderCall::Stop)?;
        self.set_streaming(false);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRemote {
    live: AtomicBool,
    checks: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new(live: bool) -> Self {
        let remote = Self::default();
        remote.live.store(live, Ordering::SeqCst);
        remote
    }

    pub fn checks(&self) -> usize {
        self.checks.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveStatus for FakeRemote {
    async fn is_live(&self, channel_id: &str) -> bool {
        self.checks.lock().unwrap().push(channel_id.to_string());
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeBroadcastApi {
    broadcasts: Mutex<Vec<LiveBroadcast>>,
    fail_list: AtomicBool,
    fail_transitions: AtomicBool,
    transitions: Mutex<Vec<(String, LifecycleStatus, Instant)>>,
}

impl FakeBroadcastApi {
    pub fn new(broadcasts: Vec<LiveBroadcast>) -> Self {
        Self {
            broadcasts: Mutex::new(broadcasts),
            ..Default::default()
        }
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_transitions(&self, fail: bool) {
        self.fail_transitions.store(fail, Ordering::SeqCst);
    }

    pub fn transitions(&self) -> Vec<(String, LifecycleStatus, Instant)> {
        self.transitions.lock().unwrap().clone()
    }

    fn api_error() -> YouTubeError {
        YouTubeError::Api {
            status: 403,
            message: "forbidden".into(),
        }
    }
}

#[async_trait]
impl BroadcastApi for FakeBroadcastApi {
    async fn list_broadcasts(&self) -> Result<Vec<LiveBroadcast>, YouTubeError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Self::api_error());
        }
        Ok(self.broadcasts.lock().unwrap().clone())
    }

    async fn transition(
        &self,
        broadcast_id: &str,
        to: &LifecycleStatus,
    ) -> Result<(), YouTubeError> {
        self.transitions
            .lock()
            .unwrap()
            .push((broadcast_id.to_string(), to.clone(), Instant::now()));
        if self.fail_transitions.load(Ordering::SeqCst) {
            return Err(Self::api_error());
        }
        // Reflect the new status so a follow-up lookup sees it.
        if let Some(b) = self
            .broadcasts
            .lock()
            .unwrap()
            .iter_mut()
            .find(|b| b.id == broadcast_id)
        {
            b.status = to.clone();
        }
        Ok(())
    }
}
