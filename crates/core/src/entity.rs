use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type EntityId = Uuid;

/// A tracked individual whose contest activity is monitored.
///
/// Rating summary fields belong to the sync path; inactivity and reminder
/// fields belong to the inactivity path. Both mutate through [`EntityUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub email: Option<String>,
    pub handle: String,
    pub current_rating: i32,
    pub max_rating: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_in_progress: bool,
    /// When the current sync lease was taken; `None` while idle.
    pub sync_started_at: Option<DateTime<Utc>>,
    pub last_submission_at: Option<DateTime<Utc>>,
    pub is_inactive: bool,
    pub inactivity_detected_at: Option<DateTime<Utc>>,
    pub last_reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_count: i32,
    pub reminders_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when registering a new entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    pub email: Option<String>,
    pub handle: String,
    #[serde(default = "default_true")]
    pub reminders_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl NewEntity {
    pub fn new(name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            handle: handle.into(),
            reminders_enabled: true,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Materialize into a fresh record with default summary state.
    pub fn into_entity(self, id: EntityId, now: DateTime<Utc>) -> Entity {
        Entity {
            id,
            name: self.name,
            email: self.email,
            handle: self.handle.trim().to_string(),
            current_rating: 0,
            max_rating: 0,
            last_synced_at: None,
            sync_in_progress: false,
            sync_started_at: None,
            last_submission_at: None,
            is_inactive: false,
            inactivity_detected_at: None,
            last_reminder_sent_at: None,
            reminder_count: 0,
            reminders_enabled: self.reminders_enabled,
            created_at: now,
        }
    }
}

/// Derived rating fields written at the end of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RatingSummary {
    pub current_rating: i32,
    pub max_rating: i32,
}

/// The permitted mutations of an [`Entity`] outside of sync commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityUpdate {
    /// Drop the sync lease without touching summary fields.
    ReleaseSync,
    /// Result of an inactivity classification.
    Inactivity {
        is_inactive: bool,
        inactivity_detected_at: Option<DateTime<Utc>>,
        last_submission_at: Option<DateTime<Utc>>,
    },
    /// A reminder was delivered successfully at the given instant.
    ReminderDelivered { at: DateTime<Utc> },
    RemindersEnabled(bool),
    /// Track a different provider handle. Stored trimmed.
    Handle(String),
}

impl Entity {
    /// Apply a typed update in place.
    pub fn apply(&mut self, update: &EntityUpdate) {
        match update {
            EntityUpdate::ReleaseSync => {
                self.sync_in_progress = false;
                self.sync_started_at = None;
            }
            EntityUpdate::Inactivity {
                is_inactive,
                inactivity_detected_at,
                last_submission_at,
            } => {
                self.is_inactive = *is_inactive;
                self.inactivity_detected_at = *inactivity_detected_at;
                self.last_submission_at = *last_submission_at;
            }
            EntityUpdate::ReminderDelivered { at } => {
                self.reminder_count += 1;
                self.last_reminder_sent_at = Some(*at);
            }
            EntityUpdate::RemindersEnabled(enabled) => {
                self.reminders_enabled = *enabled;
            }
            EntityUpdate::Handle(handle) => {
                self.handle = handle.trim().to_string();
            }
        }
    }

    /// Apply the summary half of a successful sync and release the lease.
    pub fn apply_sync(&mut self, summary: RatingSummary, synced_at: DateTime<Utc>) {
        self.current_rating = summary.current_rating;
        self.max_rating = summary.max_rating;
        self.last_synced_at = Some(synced_at);
        self.sync_in_progress = false;
        self.sync_started_at = None;
    }

    /// Whether a sync lease may be taken at `now`.
    ///
    /// A held lease blocks unless `force` is set or it was taken more than
    /// `lease` ago (the holder is assumed to have crashed).
    pub fn can_acquire_sync(&self, now: DateTime<Utc>, lease: chrono::Duration, force: bool) -> bool {
        if force || !self.sync_in_progress {
            return true;
        }
        match self.sync_started_at {
            Some(started) => now - started >= lease,
            // Flag set by something that did not record a timestamp: treat as stale.
            None => true,
        }
    }
}
