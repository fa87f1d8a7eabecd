use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityId;

/// Minimum spacing between two reminders to the same entity.
pub const REMINDER_THROTTLE_HOURS: i64 = 24;

pub fn reminder_throttle() -> Duration {
    Duration::hours(REMINDER_THROTTLE_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReminderStatus::Pending),
            "sent" => Some(ReminderStatus::Sent),
            "failed" => Some(ReminderStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only reminder log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: Uuid,
    pub entity_id: EntityId,
    pub sent_at: DateTime<Utc>,
    pub status: ReminderStatus,
    /// `None` when the entity has never had an accepted submission.
    pub inactive_days: Option<i64>,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl ReminderRecord {
    pub fn pending(entity_id: EntityId, inactive_days: Option<i64>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id,
            sent_at: at,
            status: ReminderStatus::Pending,
            inactive_days,
            message_id: None,
            error: None,
        }
    }
}

/// Final state written over a pending record once delivery resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderResolution {
    Sent { message_id: Option<String> },
    Failed { error: String },
}

impl ReminderRecord {
    pub fn resolve(&mut self, resolution: &ReminderResolution) {
        match resolution {
            ReminderResolution::Sent { message_id } => {
                self.status = ReminderStatus::Sent;
                self.message_id = message_id.clone();
                self.error = None;
            }
            ReminderResolution::Failed { error } => {
                self.status = ReminderStatus::Failed;
                self.error = Some(error.clone());
            }
        }
    }
}

/// Aggregate counters exposed to the outer layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InactivityStats {
    pub total_entities: u64,
    pub active_entities: u64,
    pub inactive_entities: u64,
    pub reminders_disabled: u64,
    pub reminders_sent: u64,
    pub reminders_failed: u64,
    /// Percentage of entities currently inactive; 0 when nothing is tracked.
    pub inactivity_rate: f64,
}
