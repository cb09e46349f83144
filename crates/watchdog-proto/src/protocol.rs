use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Poll cadence while fast-poll ("live mode") is engaged.
pub const FAST_POLL_INTERVAL_SECS: u64 = 60;

/// Number of snapshots kept in the history ring.
pub const HISTORY_CAPACITY: usize = 200;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 900;

pub const DEFAULT_FAST_POLL_TIMEOUT_MINUTES: u64 = 60;

/// Longest accepted fast-poll timeout (one week).
pub const MAX_FAST_POLL_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// Full observable state of the watchdog.
///
/// This is what every push-channel subscriber receives, and what the history
/// ring stores.  Wire names match the browser client, which predates the
/// Rust field names.
///
/// Invariants (restored by [`WatchdogState::normalize`]):
///   - `fast_poll_deadline.is_some() == fast_poll_active`
///   - `local_checks_enabled` implies `remote_checks_enabled`
///   - `poll_interval_seconds > 0`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchdogState {
    /// Last observed live status on the remote platform.
    #[serde(rename = "youtube_is_live")]
    pub remote_is_live: bool,
    /// Last observed streaming status of the local encoder.
    #[serde(rename = "obs_is_streaming")]
    pub local_is_streaming: bool,
    #[serde(rename = "check_interval")]
    pub poll_interval_seconds: u64,
    #[serde(rename = "live_mode")]
    pub fast_poll_active: bool,
    #[serde(rename = "live_mode_timeout")]
    pub fast_poll_timeout_minutes: u64,
    #[serde(rename = "live_mode_end_timestamp")]
    pub fast_poll_deadline: Option<DateTime<Utc>>,
    #[serde(rename = "youtube_enabled")]
    pub remote_checks_enabled: bool,
    #[serde(rename = "obs_enabled")]
    pub local_checks_enabled: bool,
    #[serde(rename = "last_check_timestamp")]
    pub last_check_at: Option<DateTime<Utc>>,
    /// Monotonic revision counter, incremented on every published change.
    #[serde(default)]
    pub rev: u64,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_FAST_POLL_TIMEOUT_MINUTES)
    }
}

impl WatchdogState {
    pub fn new(poll_interval_seconds: u64, fast_poll_timeout_minutes: u64) -> Self {
        Self {
            remote_is_live: false,
            local_is_streaming: false,
            poll_interval_seconds: poll_interval_seconds.max(1),
            fast_poll_active: false,
            fast_poll_timeout_minutes: fast_poll_timeout_minutes
                .clamp(1, MAX_FAST_POLL_TIMEOUT_MINUTES),
            fast_poll_deadline: None,
            remote_checks_enabled: true,
            local_checks_enabled: true,
            last_check_at: None,
            rev: 1,
        }
    }

    /// The wait between cycles: the fast cadence while fast-poll is on,
    /// otherwise the configured interval.
    pub fn effective_interval(&self) -> Duration {
        if self.fast_poll_active {
            Duration::from_secs(FAST_POLL_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.poll_interval_seconds)
        }
    }

    /// Deadline for fast-poll if it were (re)enabled at `now`.  Saturates
    /// at the latest representable time instead of overflowing.
    pub fn fast_poll_deadline_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.fast_poll_timeout_minutes)
            .ok()
            .and_then(ChronoDuration::try_minutes)
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn fast_poll_expired(&self, now: DateTime<Utc>) -> bool {
        self.fast_poll_active && self.fast_poll_deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Re-derive dependent fields so that every invariant holds again.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        self.poll_interval_seconds = self.poll_interval_seconds.max(1);
        self.fast_poll_timeout_minutes = self
            .fast_poll_timeout_minutes
            .clamp(1, MAX_FAST_POLL_TIMEOUT_MINUTES);

        // Local checks are meaningless without a remote comparison point.
        if !self.remote_checks_enabled {
            self.local_checks_enabled = false;
        }

        if !self.fast_poll_active {
            self.fast_poll_deadline = None;
        } else if self.fast_poll_deadline.is_none() {
            self.fast_poll_deadline = Some(self.fast_poll_deadline_from(now));
        }
    }

    pub fn invariants_hold(&self) -> bool {
        self.poll_interval_seconds > 0
            && (!self.local_checks_enabled || self.remote_checks_enabled)
            && self.fast_poll_active == self.fast_poll_deadline.is_some()
    }
}

/// Partial update sent by a control client.  Absent fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatePatch {
    #[serde(rename = "check_interval", default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_seconds: Option<u64>,
    #[serde(rename = "live_mode", default, skip_serializing_if = "Option::is_none")]
    pub fast_poll_active: Option<bool>,
    #[serde(rename = "live_mode_timeout", default, skip_serializing_if = "Option::is_none")]
    pub fast_poll_timeout_minutes: Option<u64>,
    #[serde(rename = "youtube_enabled", default, skip_serializing_if = "Option::is_none")]
    pub remote_checks_enabled: Option<bool>,
    #[serde(rename = "obs_enabled", default, skip_serializing_if = "Option::is_none")]
    pub local_checks_enabled: Option<bool>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("check interval must be positive")]
    ZeroInterval,
    #[error("live mode timeout must be positive")]
    ZeroTimeout,
    #[error("live mode timeout must be at most {max} minutes", max = MAX_FAST_POLL_TIMEOUT_MINUTES)]
    TimeoutTooLarge,
}

impl StatePatch {
    pub fn validate(&self) -> Result<(), PatchError> {
        if self.poll_interval_seconds == Some(0) {
            return Err(PatchError::ZeroInterval);
        }
        match self.fast_poll_timeout_minutes {
            Some(0) => Err(PatchError::ZeroTimeout),
            Some(minutes) if minutes > MAX_FAST_POLL_TIMEOUT_MINUTES => {
                Err(PatchError::TimeoutTooLarge)
            }
            _ => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
