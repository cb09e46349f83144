//! Broadcast reset helper.
//!
//! After the encoder restarts, the platform can keep the previous ingest
//! session bound to the broadcast and refuse the new stream.  Cycling the
//! broadcast's lifecycle state through `testing` releases that binding.
//!
//! Transition plans, keyed by the observed lifecycle status:
//!
//! ```text
//!   live    ──► testing ──(delay)──► live
//!   ready   ──► testing ──(delay)──► live
//!   testing ──► live
//!   other   ──► unsupported, nothing is sent
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::youtube::YouTubeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleStatus {
    Live,
    Ready,
    Testing,
    /// Any status the reset does not handle (`created`, `complete`, ...).
    Other(String),
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleStatus::Live => "live",
            LifecycleStatus::Ready => "ready",
            LifecycleStatus::Testing => "testing",
            LifecycleStatus::Other(s) => s,
        }
    }

    /// Selection priority for [`select_active`]; lower wins.
    fn priority(&self) -> Option<u8> {
        match self {
            LifecycleStatus::Live => Some(0),
            LifecycleStatus::Ready => Some(1),
            LifecycleStatus::Testing => Some(2),
            LifecycleStatus::Other(_) => None,
        }
    }
}

impl From<&str> for LifecycleStatus {
    fn from(value: &str) -> Self {
        match value {
            "live" => LifecycleStatus::Live,
            "ready" => LifecycleStatus::Ready,
            "testing" => LifecycleStatus::Testing,
            other => LifecycleStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBroadcast {
    pub id: String,
    pub title: String,
    pub status: LifecycleStatus,
}

/// Authenticated broadcast operations on the remote platform.
#[async_trait]
pub trait BroadcastApi: Send + Sync {
    async fn list_broadcasts(&self) -> Result<Vec<LiveBroadcast>, YouTubeError>;
    async fn transition(&self, broadcast_id: &str, to: &LifecycleStatus)
        -> Result<(), YouTubeError>;
}

/// Pick the broadcast to reset: live beats ready beats testing.  Ties go to
/// the first one listed; the second value is how many shared the top status.
pub fn select_active(broadcasts: &[LiveBroadcast]) -> Option<(&LiveBroadcast, usize)> {
    let best = broadcasts
        .iter()
        .filter_map(|b| b.status.priority())
        .min()?;
    let mut candidates = broadcasts
        .iter()
        .filter(|b| b.status.priority() == Some(best));
    let first = candidates.next()?;
    Some((first, 1 + candidates.count()))
}

pub struct BroadcastResetHelper {
    api: Arc<dyn BroadcastApi>,
    transition_delay: Duration,
}

impl BroadcastResetHelper {
    pub fn new(api: Arc<dyn BroadcastApi>, transition_delay: Duration) -> Self {
        Self {
            api,
            transition_delay,
        }
    }

    pub async fn find_active_broadcast(&self, channel_id: &str) -> Option<LiveBroadcast> {
        let broadcasts = match self.api.list_broadcasts().await {
            Ok(b) => b,
            Err(e) => {
                error!("YouTube API error while getting broadcasts: {}", e);
                return None;
            }
        };
        if broadcasts.is_empty() {
            info!("No broadcasts found for channel {}.", channel_id);
            return None;
        }

        let Some((broadcast, ties)) = select_active(&broadcasts) else {
            info!("No active or ready broadcasts found.");
            return None;
        };
        if ties > 1 {
            warn!(
                "{} broadcasts are '{}'; using the first one listed ({})",
                ties,
                broadcast.status.as_str(),
                broadcast.id
            );
        }
        info!(
            "Found active broadcast: {} (Status: {})",
            broadcast.title,
            broadcast.status.as_str()
        );
        Some(broadcast.clone())
    }

    /// Cycle `broadcast` through its transition plan.  Any failed request
    /// aborts the remaining steps.
    pub async fn reset(&self, broadcast: &LiveBroadcast) -> bool {
        let plan: &[LifecycleStatus] = match broadcast.status {
            LifecycleStatus::Live | LifecycleStatus::Ready => {
                &[LifecycleStatus::Testing, LifecycleStatus::Live]
            }
            LifecycleStatus::Testing => &[LifecycleStatus::Live],
            LifecycleStatus::Other(ref status) => {
                warn!("Broadcast is in unsupported status: {}", status);
                return false;
            }
        };

        for (step, target) in plan.iter().enumerate() {
            if step > 0 {
                // Give the platform time to drop the previous ingest binding.
                tokio::time::sleep(self.transition_delay).await;
            }
            info!(
                "Transitioning broadcast {} to '{}'...",
                broadcast.id,
                target.as_str()
            );
            if let Err(e) = self.api.transition(&broadcast.id, target).await {
                error!("YouTube API error while resetting broadcast: {}", e);
                return false;
            }
        }
        info!("Broadcast {} is now 'live'.", broadcast.id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBroadcastApi;

    fn broadcast(id: &str, status: &str) -> LiveBroadcast {
        LiveBroadcast {
            id: id.to_string(),
            title: format!("Broadcast {}", id),
            status: LifecycleStatus::from(status),
        }
    }

    #[test]
    fn test_select_prefers_live_then_ready_then_testing() {
        let list = vec![
            broadcast("t", "testing"),
            broadcast("r", "ready"),
            broadcast("c", "complete"),
            broadcast("l", "live"),
        ];
        assert_eq!(select_active(&list).unwrap().0.id, "l");
        assert_eq!(select_active(&list[..3]).unwrap().0.id, "r");
        assert_eq!(select_active(&list[..1]).unwrap().0.id, "t");
        assert!(select_active(&list[2..3]).is_none());
        assert!(select_active(&[]).is_none());
    }

    #[test]
    fn test_select_ties_pick_first_listed() {
        let list = vec![
            broadcast("r1", "ready"),
            broadcast("r2", "ready"),
            broadcast("t", "testing"),
        ];
        let (chosen, ties) = select_active(&list).unwrap();
        assert_eq!(chosen.id, "r1");
        assert_eq!(ties, 2);
    }

    #[tokio::test]
    async fn test_find_active_broadcast_handles_api_failure() {
        let api = Arc::new(FakeBroadcastApi::new(vec![broadcast("l", "live")]));
        api.fail_list(true);
        let helper = BroadcastResetHelper::new(api.clone(), Duration::from_secs(3));
        assert!(helper.find_active_broadcast("UC1").await.is_none());

        api.fail_list(false);
        assert_eq!(
            helper.find_active_broadcast("UC1").await.unwrap().id,
            "l"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_testing_goes_straight_to_live() {
        let api = Arc::new(FakeBroadcastApi::new(vec![]));
        let helper = BroadcastResetHelper::new(api.clone(), Duration::from_secs(3));
        let start = tokio::time::Instant::now();

        assert!(helper.reset(&broadcast("b", "testing")).await);

        let calls = api.transitions();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, LifecycleStatus::Live);
        assert_eq!(calls[0].2, start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_and_ready_pass_through_testing_with_delay() {
        for status in ["live", "ready"] {
            let api = Arc::new(FakeBroadcastApi::new(vec![]));
            let helper = BroadcastResetHelper::new(api.clone(), Duration::from_secs(3));

            assert!(helper.reset(&broadcast("b", status)).await);

            let calls = api.transitions();
            let targets: Vec<_> = calls.iter().map(|c| c.1.clone()).collect();
            assert_eq!(targets, vec![LifecycleStatus::Testing, LifecycleStatus::Live]);
            assert!(calls[1].2 - calls[0].2 >= Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn test_unsupported_status_makes_no_calls() {
        let api = Arc::new(FakeBroadcastApi::new(vec![]));
        let helper = BroadcastResetHelper::new(api.clone(), Duration::from_secs(3));

        assert!(!helper.reset(&broadcast("b", "complete")).await);
        assert!(api.transitions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_transition_aborts_reset() {
        let api = Arc::new(FakeBroadcastApi::new(vec![]));
        api.fail_transitions(true);
        let helper = BroadcastResetHelper::new(api.clone(), Duration::from_secs(3));

        assert!(!helper.reset(&broadcast("b", "live")).await);
        assert_eq!(api.transitions().len(), 1);
    }
}
