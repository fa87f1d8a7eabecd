//! PostgreSQL [`Store`] adapter.
//!
//! Snapshots keep contests and submissions as JSONB columns, since they are
//! only ever replaced wholesale. Lease acquisition is a single conditional
//! `UPDATE ... RETURNING`; sync commit and reminder reservation run inside a
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::Store;
use crate::config::PostgresConfig;
use crate::dataset::{ContestResult, DatasetSnapshot, Profile, SubmissionRecord};
use crate::entity::{Entity, EntityId, EntityUpdate, NewEntity, RatingSummary};
use crate::error::{Result, TrackerError};
use crate::reminder::{ReminderRecord, ReminderResolution, ReminderStatus};
use crate::schedule::{Frequency, ScheduleConfig};

const ENTITY_COLUMNS: &str = "id, name, email, handle, current_rating, max_rating, \
     last_synced_at, sync_in_progress, sync_started_at, last_submission_at, is_inactive, \
     inactivity_detected_at, last_reminder_sent_at, reminder_count, reminders_enabled, created_at";

pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    entity_id: Uuid,
    handle: String,
    profile: Json<Profile>,
    contests: Json<Vec<ContestResult>>,
    submissions: Json<Vec<SubmissionRecord>>,
    fetched_at: DateTime<Utc>,
}

impl From<SnapshotRow> for DatasetSnapshot {
    fn from(row: SnapshotRow) -> Self {
        Self {
            entity_id: row.entity_id,
            handle: row.handle,
            profile: row.profile.0,
            contests: row.contests.0,
            submissions: row.submissions.0,
            fetched_at: row.fetched_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    cron_expression: String,
    frequency: String,
    enabled: bool,
    last_global_run_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<ScheduleRow> for ScheduleConfig {
    fn from(row: ScheduleRow) -> Self {
        Self {
            cron_expression: row.cron_expression,
            frequency: row.frequency.parse().unwrap_or(Frequency::Daily),
            enabled: row.enabled,
            last_global_run_at: row.last_global_run_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: Uuid,
    entity_id: Uuid,
    sent_at: DateTime<Utc>,
    status: String,
    inactive_days: Option<i64>,
    message_id: Option<String>,
    error: Option<String>,
}

impl TryFrom<ReminderRow> for ReminderRecord {
    type Error = TrackerError;

    fn try_from(row: ReminderRow) -> Result<Self> {
        let status = ReminderStatus::parse(&row.status).ok_or_else(|| {
            TrackerError::Storage(format!("unknown reminder status '{}'", row.status))
        })?;
        Ok(Self {
            id: row.id,
            entity_id: row.entity_id,
            sent_at: row.sent_at,
            status,
            inactive_days: row.inactive_days,
            message_id: row.message_id,
            error: row.error,
        })
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, run migrations, and wrap the pool.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string())
            .await?;
        info!("PostgreSQL connected: {}", config.host);
        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");
        Ok(Self { pool })
    }

    async fn require_entity(&self, id: EntityId) -> Result<Entity> {
        self.get_entity(id)
            .await?
            .ok_or(TrackerError::EntityNotFound(id))
    }
}

fn map_unique_violation(e: sqlx::Error, new: &NewEntity) -> TrackerError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some(c) if c.contains("email") => TrackerError::Validation(format!(
                    "email '{}' is already registered",
                    new.email.as_deref().unwrap_or_default()
                )),
                _ => TrackerError::Validation(format!(
                    "handle '{}' is already tracked",
                    new.handle.trim()
                )),
            };
        }
    }
    e.into()
}

#[async_trait]
impl Store for PgStore {
    async fn insert_entity(&self, new: NewEntity) -> Result<Entity> {
        let entity = new.clone().into_entity(Uuid::new_v4(), Utc::now());
        sqlx::query_as::<_, Entity>(&format!(
            "INSERT INTO entities (id, name, email, handle, reminders_enabled, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ENTITY_COLUMNS}"
        ))
        .bind(entity.id)
        .bind(&entity.name)
        .bind(&entity.email)
        .bind(&entity.handle)
        .bind(entity.reminders_enabled)
        .bind(entity.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &new))
    }

    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        let row = sqlx::query_as::<_, Entity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        let rows = sqlx::query_as::<_, Entity>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_entity(&self, id: EntityId, update: EntityUpdate) -> Result<Entity> {
        let assignments = match &update {
            EntityUpdate::ReleaseSync => "sync_in_progress = FALSE, sync_started_at = NULL",
            EntityUpdate::Inactivity { .. } => {
                "is_inactive = $2, inactivity_detected_at = $3, last_submission_at = $4"
            }
            EntityUpdate::ReminderDelivered { .. } => {
                "reminder_count = reminder_count + 1, last_reminder_sent_at = $2"
            }
            EntityUpdate::RemindersEnabled(_) => "reminders_enabled = $2",
            EntityUpdate::Handle(_) => "handle = $2",
        };
        let sql = format!(
            "UPDATE entities SET {assignments} WHERE id = $1 RETURNING {ENTITY_COLUMNS}"
        );
        let query = sqlx::query_as::<_, Entity>(&sql).bind(id);
        let query = match &update {
            EntityUpdate::ReleaseSync => query,
            EntityUpdate::Inactivity {
                is_inactive,
                inactivity_detected_at,
                last_submission_at,
            } => query
                .bind(*is_inactive)
                .bind(*inactivity_detected_at)
                .bind(*last_submission_at),
            EntityUpdate::ReminderDelivered { at } => query.bind(*at),
            EntityUpdate::RemindersEnabled(enabled) => query.bind(*enabled),
            EntityUpdate::Handle(handle) => query.bind(handle.trim().to_string()),
        };
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if let (EntityUpdate::Handle(handle), sqlx::Error::Database(db)) = (&update, &e) {
                    if db.is_unique_violation() {
                        return TrackerError::Validation(format!(
                            "handle '{}' is already tracked",
                            handle.trim()
                        ));
                    }
                }
                e.into()
            })?
            .ok_or(TrackerError::EntityNotFound(id))
    }

    async fn try_acquire_sync(
        &self,
        id: EntityId,
        now: DateTime<Utc>,
        lease: Duration,
        force: bool,
    ) -> Result<Option<Entity>> {
        let acquired = sqlx::query_as::<_, Entity>(&format!(
            "UPDATE entities SET sync_in_progress = TRUE, sync_started_at = $2 \
             WHERE id = $1 AND ($3 OR NOT sync_in_progress OR sync_started_at IS NULL \
                                OR sync_started_at <= $4) \
             RETURNING {ENTITY_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .bind(force)
        .bind(now - lease)
        .fetch_optional(&self.pool)
        .await?;

        match acquired {
            Some(entity) => Ok(Some(entity)),
            None => {
                self.require_entity(id).await?;
                Ok(None)
            }
        }
    }

    async fn commit_sync(
        &self,
        snapshot: DatasetSnapshot,
        summary: RatingSummary,
    ) -> Result<Entity> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO dataset_snapshots \
                 (entity_id, handle, profile, contests, submissions, fetched_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (entity_id) DO UPDATE SET \
                 handle = EXCLUDED.handle, profile = EXCLUDED.profile, \
                 contests = EXCLUDED.contests, submissions = EXCLUDED.submissions, \
                 fetched_at = EXCLUDED.fetched_at",
        )
        .bind(snapshot.entity_id)
        .bind(&snapshot.handle)
        .bind(Json(&snapshot.profile))
        .bind(Json(&snapshot.contests))
        .bind(Json(&snapshot.submissions))
        .bind(snapshot.fetched_at)
        .execute(&mut *tx)
        .await?;

        let entity = sqlx::query_as::<_, Entity>(&format!(
            "UPDATE entities SET current_rating = $2, max_rating = $3, last_synced_at = $4, \
             sync_in_progress = FALSE, sync_started_at = NULL \
             WHERE id = $1 RETURNING {ENTITY_COLUMNS}"
        ))
        .bind(snapshot.entity_id)
        .bind(summary.current_rating)
        .bind(summary.max_rating)
        .bind(snapshot.fetched_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(TrackerError::EntityNotFound(snapshot.entity_id))?;

        tx.commit().await?;
        Ok(entity)
    }

    async fn get_snapshot(&self, id: EntityId) -> Result<Option<DatasetSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT entity_id, handle, profile, contests, submissions, fetched_at \
             FROM dataset_snapshots WHERE entity_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DatasetSnapshot::from))
    }

    async fn load_schedule(&self) -> Result<Option<ScheduleConfig>> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            "SELECT cron_expression, frequency, enabled, last_global_run_at, updated_at \
             FROM schedule_config WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ScheduleConfig::from))
    }

    async fn save_schedule(&self, config: &ScheduleConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO schedule_config \
                 (id, cron_expression, frequency, enabled, last_global_run_at, updated_at) \
             VALUES (1, $1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
                 cron_expression = EXCLUDED.cron_expression, frequency = EXCLUDED.frequency, \
                 enabled = EXCLUDED.enabled, last_global_run_at = EXCLUDED.last_global_run_at, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&config.cron_expression)
        .bind(config.frequency.to_string())
        .bind(config.enabled)
        .bind(config.last_global_run_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_global_run(&self, at: DateTime<Utc>) -> Result<()> {
        let defaults = ScheduleConfig::default();
        sqlx::query(
            "INSERT INTO schedule_config (id, cron_expression, frequency, enabled, last_global_run_at) \
             VALUES (1, $1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET last_global_run_at = EXCLUDED.last_global_run_at",
        )
        .bind(&defaults.cron_expression)
        .bind(defaults.frequency.to_string())
        .bind(defaults.enabled)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reserve_reminder(
        &self,
        entity_id: EntityId,
        inactive_days: Option<i64>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<ReminderRecord>> {
        let mut tx = self.pool.begin().await?;

        // Serialize reservations per entity for the lifetime of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        let recent: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reminders WHERE entity_id = $1 AND sent_at > $2)",
        )
        .bind(entity_id)
        .bind(now - window)
        .fetch_one(&mut *tx)
        .await?;

        if recent {
            tx.commit().await?;
            return Ok(None);
        }

        let record = ReminderRecord::pending(entity_id, inactive_days, now);
        sqlx::query(
            "INSERT INTO reminders (id, entity_id, sent_at, status, inactive_days) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.id)
        .bind(record.entity_id)
        .bind(record.sent_at)
        .bind(record.status.as_str())
        .bind(record.inactive_days)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(record))
    }

    async fn resolve_reminder(
        &self,
        id: Uuid,
        resolution: ReminderResolution,
    ) -> Result<ReminderRecord> {
        let (status, message_id, error) = match &resolution {
            ReminderResolution::Sent { message_id } => {
                (ReminderStatus::Sent, message_id.clone(), None)
            }
            ReminderResolution::Failed { error } => {
                (ReminderStatus::Failed, None, Some(error.clone()))
            }
        };
        let row = sqlx::query_as::<_, ReminderRow>(
            "UPDATE reminders SET status = $2, message_id = $3, error = $4 WHERE id = $1 \
             RETURNING id, entity_id, sent_at, status, inactive_days, message_id, error",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(message_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TrackerError::Storage(format!("reminder {id} does not exist")))?;
        row.try_into()
    }

    async fn reminder_history(
        &self,
        entity_id: EntityId,
        limit: usize,
    ) -> Result<Vec<ReminderRecord>> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            "SELECT id, entity_id, sent_at, status, inactive_days, message_id, error \
             FROM reminders WHERE entity_id = $1 ORDER BY sent_at DESC LIMIT $2",
        )
        .bind(entity_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ReminderRecord::try_from).collect()
    }

    async fn count_reminders(&self, status: ReminderStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reminders WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
