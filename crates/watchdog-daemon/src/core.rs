//! The reconciliation loop.
//!
//! One task owns every call to the remote platform and the encoder.  Each
//! cycle samples both sides, corrects a mismatch, then records a snapshot
//! and sleeps until the next interval or an explicit wake.
//!
//! ```text
//!   remote live?  encoder streaming?   action
//!   ───────────   ──────────────────   ─────────────────────────────
//!   yes           any                  none
//!   no            no                   start sequence
//!   no            yes                  stop, wait, start sequence
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use watchdog_proto::protocol::WatchdogState;
use watchdog_proto::state::StateManager;

use crate::broadcast::BroadcastResetHelper;
use crate::obs::EncoderControl;
use crate::start::start_stream;
use crate::youtube::LiveStatus;

/// What a single cycle ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Remote sampling was disabled or not configured.
    Skipped,
    /// Remote was sampled; local checks are off.
    RemoteOnly,
    AlreadyLive,
    Started { acked: bool },
    /// The encoder claimed to stream while the channel was offline.
    ZombieRestarted { stopped: bool, acked: bool },
}

pub struct Watchdog {
    state: Arc<StateManager>,
    wake: Arc<Notify>,
    remote: Option<Arc<dyn LiveStatus>>,
    encoder: Arc<dyn EncoderControl>,
    reset_helper: Option<BroadcastResetHelper>,
    channel_id: String,
    zombie_restart_delay: Duration,
    start_settle_delay: Duration,
}

impl Watchdog {
    pub fn new(
        state: Arc<StateManager>,
        wake: Arc<Notify>,
        encoder: Arc<dyn EncoderControl>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            wake,
            remote: None,
            encoder,
            reset_helper: None,
            channel_id: channel_id.into(),
            zombie_restart_delay: Duration::from_secs(5),
            start_settle_delay: Duration::from_secs(2),
        }
    }

    /// Without a remote, every cycle skips sampling.
    pub fn with_remote(mut self, remote: Arc<dyn LiveStatus>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_reset_helper(mut self, helper: BroadcastResetHelper) -> Self {
        self.reset_helper = Some(helper);
        self
    }

    pub fn with_delays(mut self, zombie_restart: Duration, start_settle: Duration) -> Self {
        self.zombie_restart_delay = zombie_restart;
        self.start_settle_delay = start_settle;
        self
    }

    pub async fn run(self) {
        info!("Watchdog started for channel {:?}", self.channel_id);
        loop {
            let outcome = self.run_cycle().await;
            debug!("Cycle finished: {:?}", outcome);
            self.wait_for_next_cycle().await;
        }
    }

    /// One full cycle, ending with a recorded and published snapshot.
    pub async fn run_cycle(&self) -> Reconciliation {
        if self.state.expire_fast_poll(Utc::now()).await {
            info!("Live mode expired. Returning to normal check interval.");
        }

        let outcome = self.reconcile().await;

        let snapshot = self.state.record_check(Utc::now()).await;
        debug!(
            "Recorded check: youtube_is_live={} obs_is_streaming={} rev={}",
            snapshot.remote_is_live, snapshot.local_is_streaming, snapshot.rev
        );
        outcome
    }

    async fn reconcile(&self) -> Reconciliation {
        if !self.state.get_state().await.remote_checks_enabled {
            debug!("YouTube checks disabled; skipping status sampling.");
            return Reconciliation::Skipped;
        }
        let Some(remote) = &self.remote else {
            warn!("YouTube is not configured; skipping status sampling.");
            return Reconciliation::Skipped;
        };

        let remote_is_live = remote.is_live(&self.channel_id).await;
        let state = self
            .state
            .mutate(|s| s.remote_is_live = remote_is_live)
            .await;

        // Re-read after the remote call; a patch may have landed meanwhile.
        if !state.local_checks_enabled {
            debug!("OBS checks disabled; skipping encoder interaction.");
            return Reconciliation::RemoteOnly;
        }

        let local_is_streaming = self.sample_encoder().await;

        match (remote_is_live, local_is_streaming) {
            (true, _) => Reconciliation::AlreadyLive,
            (false, false) => {
                warn!("YouTube stream is offline. Attempting to start OBS stream.");
                Reconciliation::Started {
                    acked: self.start().await,
                }
            }
            (false, true) => {
                warn!("OBS is streaming but YouTube is offline. Restarting the stream.");
                let stopped = match self.encoder.stop_stream().await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to stop OBS stream: {}", e);
                        false
                    }
                };
                tokio::time::sleep(self.zombie_restart_delay).await;
                Reconciliation::ZombieRestarted {
                    stopped,
                    acked: self.start().await,
                }
            }
        }
    }

    /// Query the encoder and store the answer.  Unreachable counts as not
    /// streaming.
    async fn sample_encoder(&self) -> bool {
        let streaming = match self.encoder.get_streaming().await {
            Ok(streaming) => streaming,
            Err(e) => {
                error!("Could not get OBS stream status: {}", e);
                false
            }
        };
        self.state
            .mutate(|s| s.local_is_streaming = streaming)
            .await;
        streaming
    }

    async fn start(&self) -> bool {
        let reset = self
            .reset_helper
            .as_ref()
            .map(|helper| (helper, self.channel_id.as_str()));
        let acked = start_stream(self.encoder.as_ref(), reset).await;
        if acked {
            tokio::time::sleep(self.start_settle_delay).await;
            self.sample_encoder().await;
        }
        acked
    }

    async fn wait_for_next_cycle(&self) {
        let wait = next_wait(&self.state.get_state().await, Utc::now());
        debug!("Next check in {:?}", wait);
        tokio::select! {
            biased;
            _ = self.wake.notified() => debug!("Check requested; waking early."),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Time until the next cycle: the effective interval, capped at the
/// fast-poll deadline so expiry is handled on time.
pub fn next_wait(state: &WatchdogState, now: DateTime<Utc>) -> Duration {
    let interval = state.effective_interval();
    match state.fast_poll_deadline {
        Some(deadline) if state.fast_poll_active => {
            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            interval.min(remaining)
        }
        _ => interval,
    }
}
