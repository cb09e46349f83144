use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, warn};

use watchdog_proto::protocol::{PatchError, StatePatch, WatchdogState};
use watchdog_proto::state::StateManager;

/// Request handlers shared by every client connection.  Nothing here talks
/// to the encoder or the remote platform; changes only patch state and wake
/// the reconciliation loop.
#[derive(Clone)]
pub struct Control {
    state: Arc<StateManager>,
    wake: Arc<Notify>,
}

impl Control {
    pub fn new(state: Arc<StateManager>, wake: Arc<Notify>) -> Self {
        Self { state, wake }
    }

    /// Ask for a check now.  Repeated requests before the loop wakes
    /// collapse into one.
    pub fn trigger_check(&self) {
        info!("Manual check triggered.");
        self.wake.notify_one();
    }

    pub async fn history(&self) -> Vec<WatchdogState> {
        self.state.history().await
    }

    pub async fn state(&self) -> WatchdogState {
        self.state.get_state().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogState> {
        self.state.subscribe()
    }

    /// Apply a client patch.  A patch that changes anything wakes the loop
    /// so the new settings apply immediately.
    pub async fn apply_patch(&self, patch: &StatePatch) -> Result<WatchdogState, PatchError> {
        let outcome = match self.state.apply_patch(patch, Utc::now()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Rejected state update {:?}: {}", patch, e);
                return Err(e);
            }
        };
        if outcome.changed {
            info!("State updated: {:?}", patch);
            self.wake.notify_one();
        } else {
            debug!("State update changed nothing: {:?}", patch);
        }
        Ok(outcome.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn control() -> (Control, Arc<Notify>) {
        let wake = Arc::new(Notify::new());
        (
            Control::new(Arc::new(StateManager::default()), wake.clone()),
            wake,
        )
    }

    async fn woken(wake: &Notify) -> bool {
        timeout(Duration::from_millis(50), wake.notified())
            .await
            .is_ok()
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_check_coalesces() {
        let (control, wake) = control();
        control.trigger_check();
        control.trigger_check();
        control.trigger_check();

        assert!(woken(&wake).await);
        assert!(!woken(&wake).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changing_patch_wakes_loop() {
        let (control, wake) = control();
        let state = control
            .apply_patch(&StatePatch {
                fast_poll_active: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(state.fast_poll_active);
        assert!(state.fast_poll_deadline.is_some());
        assert!(woken(&wake).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_patch_does_not_wake() {
        let (control, wake) = control();
        control
            .apply_patch(&StatePatch {
                remote_checks_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!woken(&wake).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_patch_is_rejected_without_wake() {
        let (control, wake) = control();
        let err = control
            .apply_patch(&StatePatch {
                fast_poll_timeout_minutes: Some(0),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err, PatchError::ZeroTimeout);
        assert!(!woken(&wake).await);
        assert_eq!(control.state().await.fast_poll_timeout_minutes, 60);
    }

    #[tokio::test]
    async fn test_history_starts_empty() {
        let (control, _) = control();
        assert!(control.history().await.is_empty());
    }
}
