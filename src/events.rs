//! Progress events for notification delivery
//!
//! The engine publishes these on a broadcast channel; a notification layer
//! subscribes and forwards them (toast, email, feed). Callers also get the
//! same information back in structured results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::state::UnlockRecord;

/// Something a user or team should be told about
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GamificationEvent {
    /// A user crossed a level threshold
    LevelUp {
        user_id: String,
        previous_level: u32,
        new_level: u32,
    },
    /// A user unlocked a personal achievement
    AchievementUnlocked {
        user_id: String,
        achievement_id: String,
        xp_reward: u64,
    },
    /// A workspace unlocked a team achievement
    TeamAchievementUnlocked {
        workspace_id: String,
        record: UnlockRecord,
    },
    /// A workspace crossed a team level threshold
    TeamLevelUp {
        workspace_id: String,
        previous_level: u32,
        new_level: u32,
    },
}

/// Timestamped envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: GamificationEvent,
}

/// Cloneable publisher handle
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: GamificationEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if self.tx.send(envelope).is_err() {
            trace!("No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
