//! Activity classification and throttled reminders.
//!
//! An entity is INACTIVE once at least [`INACTIVITY_THRESHOLD_DAYS`] whole days
//! have passed since its most recent accepted submission. Entities with no
//! accepted submission at all are inactive with an unbounded day count.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use cfwatch_core::{
    reminder_throttle, Entity, EntityId, EntityUpdate, InactivityStats, ReminderRecord,
    ReminderStatus, Store, SubmissionRecord, TrackerError,
};
use cfwatch_notify::{NotificationDispatcher, Recipient};

pub const INACTIVITY_THRESHOLD_DAYS: i64 = 7;

/// Result of classifying a submission list at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Activity {
    pub is_inactive: bool,
    /// 0 while active, `None` when there is no accepted submission.
    pub inactive_days: Option<i64>,
    pub last_accepted_at: Option<DateTime<Utc>>,
}

/// Classify `submissions` as of `now`. Only accepted submissions count.
pub fn classify(submissions: &[SubmissionRecord], now: DateTime<Utc>) -> Activity {
    let last_accepted_at = submissions
        .iter()
        .filter(|s| s.is_accepted())
        .map(|s| s.submitted_at)
        .max();

    match last_accepted_at {
        None => Activity {
            is_inactive: true,
            inactive_days: None,
            last_accepted_at: None,
        },
        Some(at) => {
            let days = (now - at).num_days();
            let is_inactive = days >= INACTIVITY_THRESHOLD_DAYS;
            Activity {
                is_inactive,
                inactive_days: Some(if is_inactive { days } else { 0 }),
                last_accepted_at: Some(at),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReminderOutcome {
    /// The entity is active.
    NotNeeded,
    /// The entity opted out of reminders.
    Disabled,
    /// A reminder was already logged inside the throttle window.
    Throttled,
    Sent { record: ReminderRecord },
    Failed { record: ReminderRecord },
}

impl ReminderOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InactivityReport {
    pub entity_id: EntityId,
    pub is_inactive: bool,
    pub inactive_days: Option<i64>,
    pub last_submission_at: Option<DateTime<Utc>>,
    pub reminder: ReminderOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntryOutcome {
    Checked(InactivityReport),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub entity_id: EntityId,
    pub outcome: BatchEntryOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub inactive_count: usize,
    pub error_count: usize,
    /// Percent of entries checked without error; 100 for an empty batch.
    pub success_rate: f64,
}

impl BatchSummary {
    pub fn from_entries(entries: &[BatchEntry]) -> Self {
        let total = entries.len();
        let inactive_count = entries
            .iter()
            .filter(|e| matches!(&e.outcome, BatchEntryOutcome::Checked(r) if r.is_inactive))
            .count();
        let error_count = entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchEntryOutcome::Error { .. }))
            .count();
        let success_rate = if total == 0 {
            100.0
        } else {
            percent((total - error_count) as f64, total as f64)
        };
        Self {
            total,
            inactive_count,
            error_count,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub summary: BatchSummary,
}

/// Percentage rounded to one decimal place.
fn percent(part: f64, total: f64) -> f64 {
    (part / total * 1000.0).round() / 10.0
}

pub struct InactivityDetector {
    store: Arc<dyn Store>,
    dispatcher: Arc<NotificationDispatcher>,
    /// Pause after each inactive entity in a batch, to spread mail load.
    pause: Duration,
}

impl InactivityDetector {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            pause: Duration::from_secs(2),
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub async fn check_entity(
        &self,
        id: EntityId,
        submissions: &[SubmissionRecord],
    ) -> Result<InactivityReport, TrackerError> {
        self.check_entity_at(id, submissions, Utc::now()).await
    }

    /// Classify, persist the new state, and send a reminder when warranted.
    pub async fn check_entity_at(
        &self,
        id: EntityId,
        submissions: &[SubmissionRecord],
        now: DateTime<Utc>,
    ) -> Result<InactivityReport, TrackerError> {
        let before = self
            .store
            .get_entity(id)
            .await?
            .ok_or(TrackerError::EntityNotFound(id))?;

        let activity = classify(submissions, now);
        let inactivity_detected_at = match (activity.is_inactive, before.is_inactive) {
            (false, _) => None,
            (true, false) => Some(now),
            (true, true) => before.inactivity_detected_at.or(Some(now)),
        };

        let entity = self
            .store
            .update_entity(
                id,
                EntityUpdate::Inactivity {
                    is_inactive: activity.is_inactive,
                    inactivity_detected_at,
                    last_submission_at: activity.last_accepted_at,
                },
            )
            .await?;

        if activity.is_inactive != before.is_inactive {
            info!(
                entity_id = %id,
                handle = %entity.handle,
                inactive = activity.is_inactive,
                inactive_days = ?activity.inactive_days,
                "activity state changed"
            );
        }

        let reminder = if !activity.is_inactive {
            ReminderOutcome::NotNeeded
        } else if !entity.reminders_enabled {
            debug!(entity_id = %id, "reminders disabled; not sending");
            ReminderOutcome::Disabled
        } else {
            self.handle_reminder_at(&entity, activity.inactive_days, now)
                .await?
        };

        Ok(InactivityReport {
            entity_id: id,
            is_inactive: activity.is_inactive,
            inactive_days: activity.inactive_days,
            last_submission_at: activity.last_accepted_at,
            reminder,
        })
    }

    pub async fn handle_reminder(
        &self,
        entity: &Entity,
        inactive_days: Option<i64>,
    ) -> Result<ReminderOutcome, TrackerError> {
        self.handle_reminder_at(entity, inactive_days, Utc::now())
            .await
    }

    /// Reserve a reminder slot, deliver, and record the result.
    ///
    /// Any reminder logged for the entity within the throttle window, whatever
    /// its status, makes this a no-op.
    pub async fn handle_reminder_at(
        &self,
        entity: &Entity,
        inactive_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOutcome, TrackerError> {
        let Some(pending) = self
            .store
            .reserve_reminder(entity.id, inactive_days, now, reminder_throttle())
            .await?
        else {
            debug!(entity_id = %entity.id, "reminder sent recently; skipping");
            return Ok(ReminderOutcome::Throttled);
        };

        let outcome = self
            .dispatcher
            .send(&Recipient::from(entity), inactive_days)
            .await;
        let delivered = outcome.is_sent();
        let record = self
            .store
            .resolve_reminder(pending.id, outcome.into())
            .await?;

        if delivered {
            self.store
                .update_entity(entity.id, EntityUpdate::ReminderDelivered { at: now })
                .await?;
            Ok(ReminderOutcome::Sent { record })
        } else {
            Ok(ReminderOutcome::Failed { record })
        }
    }

    /// Check entities one at a time. Per-entity failures are captured.
    pub async fn batch_check(&self, entries: Vec<(EntityId, Vec<SubmissionRecord>)>) -> BatchReport {
        let mut results = Vec::with_capacity(entries.len());
        for (entity_id, submissions) in entries {
            let checked = self.check_entity(entity_id, &submissions).await;
            self.record(&mut results, entity_id, checked).await;
        }
        Self::finish(results)
    }

    /// Re-check every entity against its stored snapshot.
    ///
    /// Each entity and its snapshot are read right before that entity is
    /// classified, so a sync committing while the pass pauses on earlier
    /// entities is never overwritten by older data. Entities with a sync in
    /// flight are left to that sync, and entities that were never synced have
    /// nothing to check.
    pub async fn check_stored(&self) -> Result<BatchReport, TrackerError> {
        let ids: Vec<EntityId> = self
            .store
            .list_entities()
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        let mut results = Vec::with_capacity(ids.len());

        for entity_id in ids {
            let submissions = match self.load_stored(entity_id).await {
                Ok(Some(submissions)) => submissions,
                Ok(None) => continue,
                Err(e) => {
                    self.record(&mut results, entity_id, Err(e)).await;
                    continue;
                }
            };
            let checked = self.check_entity(entity_id, &submissions).await;
            self.record(&mut results, entity_id, checked).await;
        }
        Ok(Self::finish(results))
    }

    /// Current submissions for `id`, or `None` when it should be skipped.
    async fn load_stored(&self, id: EntityId) -> Result<Option<Vec<SubmissionRecord>>, TrackerError> {
        let Some(entity) = self.store.get_entity(id).await? else {
            debug!(entity_id = %id, "entity removed; skipping inactivity check");
            return Ok(None);
        };
        if entity.sync_in_progress {
            debug!(entity_id = %id, "sync in progress; skipping inactivity check");
            return Ok(None);
        }
        match self.store.get_snapshot(id).await? {
            Some(snapshot) => Ok(Some(snapshot.submissions)),
            None => {
                debug!(entity_id = %id, "no snapshot yet; skipping inactivity check");
                Ok(None)
            }
        }
    }

    async fn record(
        &self,
        results: &mut Vec<BatchEntry>,
        entity_id: EntityId,
        checked: Result<InactivityReport, TrackerError>,
    ) {
        match checked {
            Ok(report) => {
                let inactive = report.is_inactive;
                results.push(BatchEntry {
                    entity_id,
                    outcome: BatchEntryOutcome::Checked(report),
                });
                if inactive && !self.pause.is_zero() {
                    tokio::time::sleep(self.pause).await;
                }
            }
            Err(e) => {
                warn!(entity_id = %entity_id, error = %e, "inactivity check failed");
                results.push(BatchEntry {
                    entity_id,
                    outcome: BatchEntryOutcome::Error {
                        error: e.to_string(),
                    },
                });
            }
        }
    }

    fn finish(entries: Vec<BatchEntry>) -> BatchReport {
        let summary = BatchSummary::from_entries(&entries);
        info!(
            total = summary.total,
            inactive = summary.inactive_count,
            errors = summary.error_count,
            success_rate = summary.success_rate,
            "inactivity batch complete"
        );
        BatchReport { entries, summary }
    }

    pub async fn stats(&self) -> Result<InactivityStats, TrackerError> {
        let entities = self.store.list_entities().await?;
        let total = entities.len() as u64;
        let inactive = entities.iter().filter(|e| e.is_inactive).count() as u64;
        let disabled = entities.iter().filter(|e| !e.reminders_enabled).count() as u64;
        let sent = self.store.count_reminders(ReminderStatus::Sent).await?;
        let failed = self.store.count_reminders(ReminderStatus::Failed).await?;

        Ok(InactivityStats {
            total_entities: total,
            active_entities: total - inactive,
            inactive_entities: inactive,
            reminders_disabled: disabled,
            reminders_sent: sent,
            reminders_failed: failed,
            inactivity_rate: if total == 0 {
                0.0
            } else {
                percent(inactive as f64, total as f64)
            },
        })
    }

    pub async fn reminder_history(
        &self,
        id: EntityId,
        limit: usize,
    ) -> Result<Vec<ReminderRecord>, TrackerError> {
        if self.store.get_entity(id).await?.is_none() {
            return Err(TrackerError::EntityNotFound(id));
        }
        self.store.reminder_history(id, limit).await
    }

    pub async fn inactive_entities(&self) -> Result<Vec<Entity>, TrackerError> {
        let mut entities = self.store.list_entities().await?;
        entities.retain(|e| e.is_inactive);
        Ok(entities)
    }
}
