//! Persistence port for entities, dataset snapshots, the schedule singleton
//! and the reminder log.
//!
//! The engine only talks to [`Store`]. Two adapters ship with the crate:
//! [`MemoryStore`] for tests and local runs, and [`PgStore`] backed by
//! PostgreSQL through sqlx.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::dataset::DatasetSnapshot;
use crate::entity::{Entity, EntityId, EntityUpdate, NewEntity, RatingSummary};
use crate::error::Result;
use crate::reminder::{ReminderRecord, ReminderResolution, ReminderStatus};
use crate::schedule::ScheduleConfig;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new entity. Duplicate handle or email is a `Validation` error.
    async fn insert_entity(&self, new: NewEntity) -> Result<Entity>;

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>>;

    async fn list_entities(&self) -> Result<Vec<Entity>>;

    /// Apply a typed update. Unknown id is `EntityNotFound`.
    async fn update_entity(&self, id: EntityId, update: EntityUpdate) -> Result<Entity>;

    /// Atomically take the per-entity sync lease.
    ///
    /// Returns `Ok(None)` when another sync holds a live lease and `force` is
    /// not set. Unknown id is `EntityNotFound`.
    async fn try_acquire_sync(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
        lease: Duration,
        force: bool,
    ) -> Result<Option<Entity>>;

    /// Upsert the snapshot and write the rating summary as one unit, releasing
    /// the sync lease.
    async fn commit_sync(
        &self,
        snapshot: DatasetSnapshot,
        summary: RatingSummary,
    ) -> Result<Entity>;

    async fn get_snapshot(&self, id: EntityId) -> Result<Option<DatasetSnapshot>>;

    async fn load_schedule(&self) -> Result<Option<ScheduleConfig>>;

    async fn save_schedule(&self, config: &ScheduleConfig) -> Result<()>;

    /// Stamp `last_global_run_at`, creating the default schedule if none exists.
    async fn record_global_run(&self, at: DateTime<Utc>) -> Result<()>;

    /// Append a pending reminder unless any reminder for the entity was logged
    /// within `window` before `now`. The check and insert are atomic.
    async fn reserve_reminder(
        &self,
        entity_id: EntityId,
        inactive_days: Option<i64>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<ReminderRecord>>;

    async fn resolve_reminder(
        &self,
        id: Uuid,
        resolution: ReminderResolution,
    ) -> Result<ReminderRecord>;

    /// Most recent reminders first.
    async fn reminder_history(&self, entity_id: EntityId, limit: usize)
        -> Result<Vec<ReminderRecord>>;

    async fn count_reminders(&self, status: ReminderStatus) -> Result<u64>;
}
