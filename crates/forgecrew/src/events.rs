//! Typed engine events over a bounded broadcast channel.
//!
//! Publishing never runs subscriber code, so a panicking, slow, or dropped
//! subscriber cannot halt orchestration or affect other subscribers. A
//! subscriber that falls more than the channel capacity behind observes a
//! `Lagged` gap and keeps receiving from there.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity; a slow subscriber past this lags rather than blocking.
const CHANNEL_CAPACITY: usize = 256;

/// Everything the engine announces while executing tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TaskStarted {
        task_id: String,
        round_budget: u32,
        timestamp: DateTime<Utc>,
    },

    /// A worker tier became the active implementer for a round.
    WorkerTierActive {
        task_id: String,
        tier: String,
        round: u32,
        timestamp: DateTime<Utc>,
    },

    /// One reviewer seat issued its verdict.
    ReviewVerdictIssued {
        task_id: String,
        reviewer: String,
        quality_score: f64,
        passed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A veto-classified finding forced rejection regardless of score.
    ReviewVeto {
        task_id: String,
        reviewer: String,
        pattern: String,
        timestamp: DateTime<Utc>,
    },

    /// The workspace was reverted (best-effort) after a rejected round.
    WorkspaceReverted {
        task_id: String,
        identity: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    TaskCompleted {
        task_id: String,
        rounds_used: u32,
        timestamp: DateTime<Utc>,
    },

    TaskLocked {
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    CostUpdate {
        task_id: String,
        total_tokens: u64,
        total_cost_usd: f64,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Stable snake_case tag, for logging and filtering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskStarted { .. } => "task_started",
            Self::WorkerTierActive { .. } => "worker_tier_active",
            Self::ReviewVerdictIssued { .. } => "review_verdict",
            Self::ReviewVeto { .. } => "review_veto",
            Self::WorkspaceReverted { .. } => "workspace_reverted",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskLocked { .. } => "task_locked",
            Self::CostUpdate { .. } => "cost_update",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::WorkerTierActive { task_id, .. }
            | Self::ReviewVerdictIssued { task_id, .. }
            | Self::ReviewVeto { task_id, .. }
            | Self::WorkspaceReverted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskLocked { task_id, .. }
            | Self::CostUpdate { task_id, .. } => task_id,
        }
    }
}

/// Broadcast bus for engine events.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish to all current subscribers. Best-effort: having no
    /// subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => debug!(kind, receivers, "event published"),
            Err(_) => debug!(kind, "event published (no subscribers)"),
        }
    }

    /// Subscribe to events from this point on. Dropping the returned
    /// subscription unsubscribes.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an event stream; drop to unsubscribe.
pub struct EventSubscription {
    receiver: broadcast::Receiver<EngineEvent>,
}

impl EventSubscription {
    /// Receive the next event, skipping over any lagged gap.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged; continuing");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no event is queued.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(task_id: &str) -> EngineEvent {
        EngineEvent::TaskStarted {
            task_id: task_id.into(),
            round_budget: 3,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(started("t-1"));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind(), "task_started");
        assert_eq!(event.task_id(), "t-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        // Must not panic or error.
        bus.publish(started("t-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_independent_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(started("t-2"));

        assert_eq!(a.recv().await.unwrap().task_id(), "t-2");
        assert_eq!(b.recv().await.unwrap().task_id(), "t-2");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let b = bus.subscribe();
        drop(b);

        bus.publish(started("t-3"));
        assert_eq!(a.recv().await.unwrap().task_id(), "t-3");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(started(&format!("t-{i}")));
        }

        // First recv skips the lag and yields the oldest retained event.
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind(), "task_started");
    }

    #[test]
    fn test_event_serde_tagging() {
        let json = serde_json::to_string(&EngineEvent::TaskLocked {
            task_id: "t-4".into(),
            reason: "roster exhausted".into(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"task_locked\""));
    }
}
