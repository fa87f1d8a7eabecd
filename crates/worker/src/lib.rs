//! Service facade over the tracker's components.
//!
//! [`Tracker`] wires the store, provider client, mailer, sync engine and
//! scheduler together and exposes the operations an outer layer (CLI, HTTP,
//! admin tooling) calls.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use cfwatch_core::config::{Config, PostgresConfig, TrackerConfig};
use cfwatch_core::{
    Entity, EntityId, EntityUpdate, Frequency, InactivityStats, MemoryStore, NewEntity, PgStore,
    ReminderRecord, ScheduleConfig, ScheduleUpdate, Store, TrackerError,
};
use cfwatch_engine::{
    GlobalSyncReport, InactivityDetector, ReminderOutcome, SyncOrchestrator, SyncOutcome,
    SyncReport, INACTIVITY_THRESHOLD_DAYS,
};
use cfwatch_fetch::{ActivitySource, CodeforcesClient};
use cfwatch_notify::{Mailer, NotificationDispatcher, SmtpMailer, UnconfiguredMailer};
use cfwatch_scheduler::{GlobalSyncTask, InactivityTask, Scheduler, SchedulerStatus};

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

/// Open PostgreSQL when configured, otherwise fall back to process memory.
pub async fn open_store(config: &PostgresConfig) -> Result<Arc<dyn Store>> {
    if config.is_configured() {
        Ok(Arc::new(PgStore::connect(config).await?))
    } else {
        warn!("PostgreSQL not configured; using in-memory store (data is lost on exit)");
        Ok(Arc::new(MemoryStore::new()))
    }
}

/// SMTP when a sender is configured; otherwise every send fails as a logged outcome.
pub fn build_mailer(config: &Config) -> Result<Arc<dyn Mailer>> {
    if config.smtp.is_configured() {
        Ok(Arc::new(SmtpMailer::from_config(&config.smtp)?))
    } else {
        warn!("SMTP sender not configured; reminders will be recorded as failed");
        Ok(Arc::new(UnconfiguredMailer))
    }
}

pub struct Tracker {
    store: Arc<dyn Store>,
    orchestrator: Arc<SyncOrchestrator>,
    detector: Arc<InactivityDetector>,
    scheduler: Scheduler,
    sync_on_register: bool,
    /// Syncs started on registration or handle change; drained by `shutdown`.
    background: Mutex<JoinSet<()>>,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ActivitySource>,
        mailer: Arc<dyn Mailer>,
        config: &TrackerConfig,
    ) -> Self {
        let dispatcher = Arc::new(NotificationDispatcher::new(mailer));
        let detector = Arc::new(
            InactivityDetector::new(store.clone(), dispatcher).with_pause(config.reminder_pause()),
        );
        let orchestrator = Arc::new(
            SyncOrchestrator::new(store.clone(), source, detector.clone())
                .with_lease(config.sync_lease())
                .with_concurrency(config.sync_concurrency),
        );
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(GlobalSyncTask::new(orchestrator.clone())),
            Arc::new(InactivityTask::new(detector.clone())),
        )
        .with_inactivity_cron(config.inactivity_cron.clone())
        .with_reload_interval(config.schedule_reload());

        Self {
            store,
            orchestrator,
            detector,
            scheduler,
            sync_on_register: config.sync_on_register,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Build every component from environment-derived configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = open_store(&config.postgres).await?;
        let client = CodeforcesClient::from_config(&config.provider)
            .map_err(|e| TrackerError::Config(e.to_string()))?;
        let mailer = build_mailer(config)?;
        Ok(Self::new(store, Arc::new(client), mailer, &config.tracker))
    }

    /// Load the persisted schedule and start the timer jobs. The scheduler
    /// then follows schedule changes persisted by other processes.
    pub async fn start(&self) -> Result<ScheduleConfig> {
        self.scheduler.initialize().await
    }

    /// Stop the scheduler and wait for background syncs to finish.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        let mut pending = std::mem::take(&mut *self.background.lock().await);
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "background sync task aborted");
            }
        }
    }

    async fn spawn_sync(&self, id: EntityId, force: bool) {
        let orchestrator = self.orchestrator.clone();
        let mut background = self.background.lock().await;
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            match orchestrator.sync_entity(id, force).await {
                Ok(SyncOutcome::Synced(report)) => info!(
                    entity_id = %id,
                    handle = %report.handle,
                    current_rating = report.current_rating,
                    "background sync complete"
                ),
                Ok(SyncOutcome::Skipped { .. }) => {
                    debug!(entity_id = %id, "background sync skipped; lease held")
                }
                Err(e) => warn!(entity_id = %id, error = %e, kind = e.kind(), "background sync failed"),
            }
        });
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ── Entities ─────────────────────────────────────────────────

    pub async fn register_entity(&self, new: NewEntity) -> Result<Entity> {
        if new.name.trim().is_empty() {
            return Err(TrackerError::Validation("name is required".to_string()));
        }
        if new.handle.trim().is_empty() {
            return Err(TrackerError::Validation("handle is required".to_string()));
        }
        if let Some(email) = &new.email {
            if !email.contains('@') {
                return Err(TrackerError::Validation(format!("invalid email '{email}'")));
            }
        }
        let entity = self.store.insert_entity(new).await?;
        info!(entity_id = %entity.id, handle = %entity.handle, "entity registered");
        if self.sync_on_register {
            self.spawn_sync(entity.id, false).await;
        }
        Ok(entity)
    }

    /// Point an entity at a different provider handle and resync it in the
    /// background. The resync is forced, so it runs even while another sync
    /// still holds the lease for the old handle.
    pub async fn update_handle(&self, id: EntityId, handle: &str) -> Result<Entity> {
        if handle.trim().is_empty() {
            return Err(TrackerError::Validation("handle is required".to_string()));
        }
        let before = self
            .store
            .get_entity(id)
            .await?
            .ok_or(TrackerError::EntityNotFound(id))?;
        if before.handle == handle.trim() {
            return Ok(before);
        }
        let entity = self
            .store
            .update_entity(id, EntityUpdate::Handle(handle.to_string()))
            .await?;
        info!(entity_id = %id, from = %before.handle, to = %entity.handle, "handle changed");
        self.spawn_sync(id, true).await;
        Ok(entity)
    }

    pub async fn list_entities(&self) -> Result<Vec<Entity>> {
        self.store.list_entities().await
    }

    pub async fn inactive_entities(&self) -> Result<Vec<Entity>> {
        self.detector.inactive_entities().await
    }

    pub async fn toggle_reminders(&self, id: EntityId, enabled: bool) -> Result<Entity> {
        let entity = self
            .store
            .update_entity(id, EntityUpdate::RemindersEnabled(enabled))
            .await?;
        info!(entity_id = %id, enabled, "reminders toggled");
        Ok(entity)
    }

    // ── Sync ─────────────────────────────────────────────────────

    /// Sync one entity now. A sync already in flight is a `Concurrency` error.
    pub async fn trigger_sync(&self, id: EntityId, force: bool) -> Result<SyncReport> {
        match self.orchestrator.sync_entity(id, force).await? {
            SyncOutcome::Synced(report) => Ok(report),
            SyncOutcome::Skipped { entity_id } => Err(TrackerError::Concurrency(entity_id)),
        }
    }

    pub async fn trigger_global_sync(&self) -> Result<GlobalSyncReport> {
        self.orchestrator.sync_all().await
    }

    // ── Schedule ─────────────────────────────────────────────────

    pub async fn get_schedule(&self) -> Result<ScheduleConfig> {
        Ok(self.store.load_schedule().await?.unwrap_or_default())
    }

    /// Validate and persist a new sync schedule. A started tracker swaps its
    /// job immediately; otherwise the running daemon applies it on reload.
    pub async fn set_schedule(
        &self,
        cron_expression: &str,
        frequency: Frequency,
        enabled: bool,
    ) -> Result<ScheduleConfig> {
        self.scheduler
            .update_schedule(ScheduleUpdate {
                cron_expression: cron_expression.to_string(),
                frequency,
                enabled,
            })
            .await
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    // ── Inactivity & reminders ───────────────────────────────────

    pub async fn get_inactivity_stats(&self) -> Result<InactivityStats> {
        self.detector.stats().await
    }

    pub async fn reminder_history(&self, id: EntityId, limit: usize) -> Result<Vec<ReminderRecord>> {
        self.detector.reminder_history(id, limit).await
    }

    /// Send a reminder as if the entity had just crossed the threshold.
    /// The usual 24 h throttle still applies.
    pub async fn send_test_reminder(&self, id: EntityId) -> Result<ReminderOutcome> {
        let entity = self
            .store
            .get_entity(id)
            .await?
            .ok_or(TrackerError::EntityNotFound(id))?;
        if entity.email.as_deref().map_or(true, |e| e.trim().is_empty()) {
            return Err(TrackerError::Validation(format!(
                "entity {id} has no email address"
            )));
        }
        self.detector
            .handle_reminder(&entity, Some(INACTIVITY_THRESHOLD_DAYS))
            .await
    }

    /// Check the mail transport. Diagnostics only.
    pub async fn verify_mailer(&self) -> Result<()> {
        self.detector.dispatcher().verify().await?;
        Ok(())
    }
}
