use crate::protocol::{PatchError, StatePatch, WatchdogState, HISTORY_CAPACITY};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};

/// Bounded, insertion-ordered trail of state snapshots.  Oldest entries are
/// evicted first once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    entries: VecDeque<WatchdogState>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: WatchdogState) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    /// Oldest to newest.
    pub fn to_vec(&self) -> Vec<WatchdogState> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

/// Result of applying a control patch.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// Whether any field actually changed.  Unchanged patches are not
    /// published and must not wake the reconciliation loop.
    pub changed: bool,
    pub state: WatchdogState,
}

/// Owns the process-wide [`WatchdogState`], the history ring and the change
/// notifier.  Every mutation goes through here so invariants are restored in
/// one place.
pub struct StateManager {
    state: RwLock<WatchdogState>,
    history: RwLock<HistoryRing>,
    notifier: broadcast::Sender<WatchdogState>,
}

impl StateManager {
    pub fn new(initial: WatchdogState) -> Self {
        let (notifier, _) = broadcast::channel(64);
        let mut state = initial;
        state.normalize(Utc::now());
        Self {
            state: RwLock::new(state),
            history: RwLock::new(HistoryRing::default()),
            notifier,
        }
    }

    /// Register a new subscriber.  Each receiver gets every published snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogState> {
        self.notifier.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.receiver_count()
    }

    pub async fn get_state(&self) -> WatchdogState {
        self.state.read().await.clone()
    }

    pub async fn history(&self) -> Vec<WatchdogState> {
        self.history.read().await.to_vec()
    }

    /// Apply `mutator`, restore invariants and publish the result.
    pub async fn update<F>(&self, mutator: F) -> WatchdogState
    where
        F: FnOnce(&mut WatchdogState),
    {
        let snapshot = self.mutate(mutator).await;
        self.publish(snapshot.clone());
        snapshot
    }

    /// Like [`update`](Self::update) but without notifying subscribers.
    /// Used for mid-cycle observations that are published once the cycle ends.
    pub async fn mutate<F>(&self, mutator: F) -> WatchdogState
    where
        F: FnOnce(&mut WatchdogState),
    {
        let mut state = self.state.write().await;
        mutator(&mut state);
        state.normalize(Utc::now());
        state.rev += 1;
        state.clone()
    }

    /// Validated entry point for control-surface changes.
    ///
    /// Each present field is compared against its current value.  Turning
    /// fast-poll on, or changing its timeout while it is on, recomputes the
    /// deadline from `now`.
    pub async fn apply_patch(
        &self,
        patch: &StatePatch,
        now: DateTime<Utc>,
    ) -> Result<PatchOutcome, PatchError> {
        patch.validate()?;

        let snapshot = {
            let mut state = self.state.write().await;
            let before = state.clone();

            if let Some(interval) = patch.poll_interval_seconds {
                state.poll_interval_seconds = interval;
            }

            let timeout_changed = patch
                .fast_poll_timeout_minutes
                .is_some_and(|minutes| minutes != state.fast_poll_timeout_minutes);
            if let Some(minutes) = patch.fast_poll_timeout_minutes {
                state.fast_poll_timeout_minutes = minutes;
            }

            match patch.fast_poll_active {
                Some(true) if !state.fast_poll_active => {
                    state.fast_poll_active = true;
                    state.fast_poll_deadline = Some(state.fast_poll_deadline_from(now));
                }
                Some(false) => {
                    state.fast_poll_active = false;
                    state.fast_poll_deadline = None;
                }
                _ => {
                    if timeout_changed && state.fast_poll_active {
                        state.fast_poll_deadline = Some(state.fast_poll_deadline_from(now));
                    }
                }
            }

            if let Some(enabled) = patch.remote_checks_enabled {
                state.remote_checks_enabled = enabled;
            }
            if let Some(enabled) = patch.local_checks_enabled {
                state.local_checks_enabled = enabled;
            }

            state.normalize(now);

            if *state == before {
                return Ok(PatchOutcome {
                    changed: false,
                    state: before,
                });
            }

            state.rev += 1;
            state.clone()
        };

        self.publish(snapshot.clone());
        Ok(PatchOutcome {
            changed: true,
            state: snapshot,
        })
    }

    /// Turn fast-poll off if its deadline has passed.  Returns true when it
    /// was disabled by this call.
    pub async fn expire_fast_poll(&self, now: DateTime<Utc>) -> bool {
        if !self.state.read().await.fast_poll_expired(now) {
            return false;
        }
        // Re-checked under the write lock: a patch may have re-armed it.
        self.update(|state| {
            if state.fast_poll_expired(now) {
                state.fast_poll_active = false;
            }
        })
        .await;
        true
    }

    /// Close a reconciliation cycle: stamp the check time, append a snapshot
    /// to the history ring and notify every subscriber.
    pub async fn record_check(&self, at: DateTime<Utc>) -> WatchdogState {
        let snapshot = self
            .mutate(|state| {
                state.last_check_at = Some(at);
            })
            .await;
        self.history.write().await.push(snapshot.clone());
        self.publish(snapshot.clone());
        snapshot
    }

    fn publish(&self, snapshot: WatchdogState) {
        // No receivers is fine; a closed or lagging receiver only affects itself.
        let _ = self.notifier.send(snapshot);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(WatchdogState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_FAST_POLL_TIMEOUT_MINUTES;
    use chrono::Duration as ChronoDuration;

    fn snapshot_with_interval(secs: u64) -> WatchdogState {
        WatchdogState::new(secs, 60)
    }

    #[test]
    fn test_history_ring_evicts_oldest() {
        let mut ring = HistoryRing::default();
        for i in 1..=201 {
            ring.push(snapshot_with_interval(i));
        }
        assert_eq!(ring.len(), 200);
        let entries = ring.to_vec();
        assert_eq!(entries.first().unwrap().poll_interval_seconds, 2);
        assert_eq!(entries.last().unwrap().poll_interval_seconds, 201);
        assert!(entries.iter().all(|s| s.poll_interval_seconds != 1));
    }

    #[tokio::test]
    async fn test_disabling_remote_forces_local_off() {
        let manager = StateManager::default();
        let patch = StatePatch {
            remote_checks_enabled: Some(false),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&patch, Utc::now()).await.unwrap();
        assert!(outcome.changed);
        assert!(!outcome.state.remote_checks_enabled);
        assert!(!outcome.state.local_checks_enabled);

        // Re-enabling local alone cannot break the invariant.
        let patch = StatePatch {
            local_checks_enabled: Some(true),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&patch, Utc::now()).await.unwrap();
        assert!(!outcome.changed);
        assert!(!outcome.state.local_checks_enabled);
    }

    #[tokio::test]
    async fn test_fast_poll_deadline_tracks_flag() {
        let manager = StateManager::default();
        let now = Utc::now();

        let on = StatePatch {
            fast_poll_active: Some(true),
            fast_poll_timeout_minutes: Some(10),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&on, now).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(
            outcome.state.fast_poll_deadline,
            Some(now + ChronoDuration::minutes(10))
        );

        // Enabling again is not a change and keeps the original deadline.
        let later = now + ChronoDuration::minutes(3);
        let again = StatePatch {
            fast_poll_active: Some(true),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&again, later).await.unwrap();
        assert!(!outcome.changed);
        assert_eq!(
            outcome.state.fast_poll_deadline,
            Some(now + ChronoDuration::minutes(10))
        );

        // Changing the timeout while on recomputes from the patch time.
        let retime = StatePatch {
            fast_poll_timeout_minutes: Some(20),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&retime, later).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(
            outcome.state.fast_poll_deadline,
            Some(later + ChronoDuration::minutes(20))
        );

        let off = StatePatch {
            fast_poll_active: Some(false),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&off, later).await.unwrap();
        assert!(!outcome.state.fast_poll_active);
        assert_eq!(outcome.state.fast_poll_deadline, None);
    }

    #[tokio::test]
    async fn test_timeout_change_while_off_sets_no_deadline() {
        let manager = StateManager::default();
        let patch = StatePatch {
            fast_poll_timeout_minutes: Some(5),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&patch, Utc::now()).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.state.fast_poll_timeout_minutes, 5);
        assert_eq!(outcome.state.fast_poll_deadline, None);
    }

    #[tokio::test]
    async fn test_invalid_patch_leaves_state_untouched() {
        let manager = StateManager::default();
        let before = manager.get_state().await;
        let patch = StatePatch {
            poll_interval_seconds: Some(0),
            remote_checks_enabled: Some(false),
            ..Default::default()
        };
        assert_eq!(
            manager.apply_patch(&patch, Utc::now()).await.unwrap_err(),
            PatchError::ZeroInterval
        );
        assert_eq!(manager.get_state().await, before);
    }

    #[tokio::test]
    async fn test_boundary_values_do_not_panic() {
        let manager = StateManager::default();
        let now = Utc::now();

        let err = manager
            .apply_patch(
                &StatePatch {
                    fast_poll_active: Some(true),
                    fast_poll_timeout_minutes: Some(200_000_000_000),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap_err();
        assert_eq!(err, PatchError::TimeoutTooLarge);
        assert!(!manager.get_state().await.fast_poll_active);

        let outcome = manager
            .apply_patch(
                &StatePatch {
                    poll_interval_seconds: Some(u64::MAX),
                    fast_poll_active: Some(true),
                    fast_poll_timeout_minutes: Some(MAX_FAST_POLL_TIMEOUT_MINUTES),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        assert!(outcome.changed);
        assert!(outcome.state.invariants_hold());
        assert_eq!(outcome.state.poll_interval_seconds, u64::MAX);
        assert_eq!(
            outcome.state.fast_poll_deadline,
            Some(now + ChronoDuration::minutes(MAX_FAST_POLL_TIMEOUT_MINUTES as i64))
        );
    }

    #[tokio::test]
    async fn test_unchanged_patch_is_not_published() {
        let manager = StateManager::default();
        let mut rx = manager.subscribe();
        let patch = StatePatch {
            poll_interval_seconds: Some(900),
            ..Default::default()
        };
        let outcome = manager.apply_patch(&patch, Utc::now()).await.unwrap();
        assert!(!outcome.changed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_changed_patch_is_published_to_all_subscribers() {
        let manager = StateManager::default();
        let mut first = manager.subscribe();
        let mut second = manager.subscribe();
        let dropped = manager.subscribe();
        drop(dropped);

        let patch = StatePatch {
            poll_interval_seconds: Some(120),
            ..Default::default()
        };
        manager.apply_patch(&patch, Utc::now()).await.unwrap();

        assert_eq!(first.recv().await.unwrap().poll_interval_seconds, 120);
        assert_eq!(second.recv().await.unwrap().poll_interval_seconds, 120);
        assert_eq!(manager.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_expire_fast_poll() {
        let manager = StateManager::default();
        let now = Utc::now();
        manager
            .apply_patch(
                &StatePatch {
                    fast_poll_active: Some(true),
                    fast_poll_timeout_minutes: Some(1),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        assert!(!manager.expire_fast_poll(now).await);
        assert!(
            manager
                .expire_fast_poll(now + ChronoDuration::minutes(2))
                .await
        );
        let state = manager.get_state().await;
        assert!(!state.fast_poll_active);
        assert!(state.fast_poll_deadline.is_none());
    }

    #[tokio::test]
    async fn test_record_check_appends_history_and_notifies() {
        let manager = StateManager::default();
        let mut rx = manager.subscribe();
        let at = Utc::now();

        manager.mutate(|s| s.remote_is_live = true).await;
        assert!(rx.try_recv().is_err());

        let snapshot = manager.record_check(at).await;
        assert_eq!(snapshot.last_check_at, Some(at));
        assert!(snapshot.remote_is_live);

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed, snapshot);

        let history = manager.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], snapshot);
    }

    #[tokio::test]
    async fn test_update_enforces_invariants() {
        let manager = StateManager::default();
        let state = manager
            .update(|s| {
                s.remote_checks_enabled = false;
                s.local_checks_enabled = true;
            })
            .await;
        assert!(state.invariants_hold());
        assert!(!state.local_checks_enabled);
    }
}
