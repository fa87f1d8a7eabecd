//! In-process [`Store`] guarded by a single async `RwLock`.
//!
//! Every multi-step operation (lease acquisition, sync commit, reminder
//! reservation) runs under one write guard, which gives the same atomicity
//! the SQL adapter gets from row locks and transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Store;
use crate::dataset::DatasetSnapshot;
use crate::entity::{Entity, EntityId, EntityUpdate, NewEntity, RatingSummary};
use crate::error::{Result, TrackerError};
use crate::reminder::{ReminderRecord, ReminderResolution, ReminderStatus};
use crate::schedule::ScheduleConfig;

#[derive(Default)]
struct State {
    entities: HashMap<EntityId, Entity>,
    snapshots: HashMap<EntityId, DatasetSnapshot>,
    schedule: Option<ScheduleConfig>,
    reminders: Vec<ReminderRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_entity(&self, new: NewEntity) -> Result<Entity> {
        let mut state = self.state.write().await;
        let handle = new.handle.trim().to_lowercase();
        if state
            .entities
            .values()
            .any(|e| e.handle.to_lowercase() == handle)
        {
            return Err(TrackerError::Validation(format!(
                "handle '{}' is already tracked",
                new.handle.trim()
            )));
        }
        if let Some(email) = new.email.as_deref() {
            if state
                .entities
                .values()
                .any(|e| e.email.as_deref() == Some(email))
            {
                return Err(TrackerError::Validation(format!(
                    "email '{email}' is already registered"
                )));
            }
        }
        let entity = new.into_entity(Uuid::new_v4(), Utc::now());
        state.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.state.read().await.entities.get(&id).cloned())
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        let state = self.state.read().await;
        let mut entities: Vec<Entity> = state.entities.values().cloned().collect();
        entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entities)
    }

    async fn update_entity(&self, id: EntityId, update: EntityUpdate) -> Result<Entity> {
        let mut state = self.state.write().await;
        if let EntityUpdate::Handle(handle) = &update {
            let wanted = handle.trim().to_lowercase();
            if state
                .entities
                .values()
                .any(|e| e.id != id && e.handle.to_lowercase() == wanted)
            {
                return Err(TrackerError::Validation(format!(
                    "handle '{}' is already tracked",
                    handle.trim()
                )));
            }
        }
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or(TrackerError::EntityNotFound(id))?;
        entity.apply(&update);
        Ok(entity.clone())
    }

    async fn try_acquire_sync(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
        lease: Duration,
        force: bool,
    ) -> Result<Option<Entity>> {
        let mut state = self.state.write().await;
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or(TrackerError::EntityNotFound(id))?;
        if !entity.can_acquire_sync(now, lease, force) {
            return Ok(None);
        }
        entity.sync_in_progress = true;
        entity.sync_started_at = Some(now);
        Ok(Some(entity.clone()))
    }

    async fn commit_sync(
        &self,
        snapshot: DatasetSnapshot,
        summary: RatingSummary,
    ) -> Result<Entity> {
        let mut state = self.state.write().await;
        let id = snapshot.entity_id;
        let fetched_at = snapshot.fetched_at;
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or(TrackerError::EntityNotFound(id))?;
        entity.apply_sync(summary, fetched_at);
        let entity = entity.clone();
        state.snapshots.insert(id, snapshot);
        Ok(entity)
    }

    async fn get_snapshot(&self, id: EntityId) -> Result<Option<DatasetSnapshot>> {
        Ok(self.state.read().await.snapshots.get(&id).cloned())
    }

    async fn load_schedule(&self) -> Result<Option<ScheduleConfig>> {
        Ok(self.state.read().await.schedule.clone())
    }

    async fn save_schedule(&self, config: &ScheduleConfig) -> Result<()> {
        self.state.write().await.schedule = Some(config.clone());
        Ok(())
    }

    async fn record_global_run(&self, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .schedule
            .get_or_insert_with(ScheduleConfig::default)
            .last_global_run_at = Some(at);
        Ok(())
    }

    async fn reserve_reminder(
        &self,
        entity_id: EntityId,
        inactive_days: Option<i64>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<ReminderRecord>> {
        let mut state = self.state.write().await;
        let recent = state
            .reminders
            .iter()
            .any(|r| r.entity_id == entity_id && r.sent_at > now - window);
        if recent {
            return Ok(None);
        }
        let record = ReminderRecord::pending(entity_id, inactive_days, now);
        state.reminders.push(record.clone());
        Ok(Some(record))
    }

    async fn resolve_reminder(
        &self,
        id: Uuid,
        resolution: ReminderResolution,
    ) -> Result<ReminderRecord> {
        let mut state = self.state.write().await;
        let record = state
            .reminders
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| TrackerError::Storage(format!("reminder {id} does not exist")))?;
        record.resolve(&resolution);
        Ok(record.clone())
    }

    async fn reminder_history(
        &self,
        entity_id: EntityId,
        limit: usize,
    ) -> Result<Vec<ReminderRecord>> {
        let state = self.state.read().await;
        let mut history: Vec<ReminderRecord> = state
            .reminders
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        history.truncate(limit);
        Ok(history)
    }

    async fn count_reminders(&self, status: ReminderStatus) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.reminders.iter().filter(|r| r.status == status).count() as u64)
    }
}
