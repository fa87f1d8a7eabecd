//! [`Scheduler`]: owns the sync and inactivity cron jobs.
//!
//! Each job is a tokio task that sleeps until its next tick and then runs its
//! [`ScheduledTask`] under a firing lock. The lock belongs to the task slot,
//! not the job, so a replacement job cannot fire while its predecessor is
//! still running.
//!
//! A started scheduler also watches the persisted [`ScheduleConfig`] and
//! applies changes written by other processes (e.g. `cfwatch schedule set`).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cfwatch_core::{ScheduleConfig, ScheduleUpdate, Store, TrackerError};

use crate::cron::{next_fire_after, normalize_cron, parse_cron};
use crate::task::ScheduledTask;

pub const DEFAULT_INACTIVITY_CRON: &str = "0 0 * * *";
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

struct Job {
    name: String,
    expression: String,
    schedule: Schedule,
    generation: u64,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Job {
    fn status(&self) -> JobStatus {
        JobStatus {
            name: self.name.clone(),
            expression: self.expression.clone(),
            generation: self.generation,
            next_fire_at: next_fire_after(&self.schedule, Utc::now()),
        }
    }

    /// Signal the loop to exit. A firing already in progress runs to completion.
    fn stop(self) {
        debug!(job = %self.name, generation = self.generation, "stopping job");
        let _ = self.stop.send(true);
        drop(self.handle);
    }
}

/// One slot holds at most one live job plus the lock its firings share.
struct Slot {
    task: Arc<dyn ScheduledTask>,
    firing: Arc<Mutex<()>>,
    job: Option<Job>,
}

impl Slot {
    fn new(task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            task,
            firing: Arc::new(Mutex::new(())),
            job: None,
        }
    }
}

/// The persisted fields a running scheduler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Applied {
    cron_expression: String,
    enabled: bool,
}

impl From<&ScheduleConfig> for Applied {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            cron_expression: config.cron_expression.clone(),
            enabled: config.enabled,
        }
    }
}

struct State {
    sync: Slot,
    inactivity: Slot,
    generation: u64,
    /// `None` until `initialize`; only a started scheduler runs jobs.
    applied: Option<Applied>,
    watcher: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl State {
    fn is_started(&self) -> bool {
        self.applied.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub expression: String,
    pub generation: u64,
    pub next_fire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub sync: Option<JobStatus>,
    pub inactivity: Option<JobStatus>,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    inactivity_cron: String,
    reload_interval: Duration,
    /// Held across validate-persist-swap so updates apply one at a time.
    state: Arc<Mutex<State>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        sync_task: Arc<dyn ScheduledTask>,
        inactivity_task: Arc<dyn ScheduledTask>,
    ) -> Self {
        Self {
            store,
            inactivity_cron: DEFAULT_INACTIVITY_CRON.to_string(),
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            state: Arc::new(Mutex::new(State {
                sync: Slot::new(sync_task),
                inactivity: Slot::new(inactivity_task),
                generation: 0,
                applied: None,
                watcher: None,
            })),
        }
    }

    pub fn with_inactivity_cron(mut self, expr: impl Into<String>) -> Self {
        self.inactivity_cron = expr.into();
        self
    }

    /// How often a started scheduler re-reads the persisted schedule.
    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Load (or create) the persisted schedule and start the jobs.
    ///
    /// The inactivity job always runs once the scheduler is started. The
    /// `enabled` flag of the persisted schedule governs the sync job only,
    /// both here and in [`update_schedule`](Self::update_schedule).
    pub async fn initialize(&self) -> Result<ScheduleConfig, TrackerError> {
        let inactivity_schedule = parse_cron(&self.inactivity_cron)?;

        let config = match self.store.load_schedule().await? {
            Some(config) => config,
            None => {
                let config = ScheduleConfig::default();
                self.store.save_schedule(&config).await?;
                info!(cron = %config.cron_expression, "no schedule stored; persisted default");
                config
            }
        };
        let sync_schedule = if config.enabled {
            Some(parse_cron(&config.cron_expression)?)
        } else {
            None
        };

        let mut state = self.state.lock().await;
        apply_sync(&mut state, &config, sync_schedule);
        if state.inactivity.job.is_none() {
            replace_job(
                &mut state,
                SlotKind::Inactivity,
                &self.inactivity_cron,
                inactivity_schedule,
            );
        }
        if state.watcher.is_none() {
            state.watcher = Some(self.spawn_watcher());
        }

        info!(
            sync_cron = %config.cron_expression,
            sync_enabled = config.enabled,
            inactivity_cron = %self.inactivity_cron,
            reload_secs = self.reload_interval.as_secs(),
            "scheduler initialized"
        );
        Ok(config)
    }

    /// Validate and persist, then swap the sync job if this scheduler runs.
    ///
    /// An invalid expression is rejected before anything changes. The new job
    /// is started before the old one is stopped. A scheduler that was never
    /// initialized only persists; the process running the jobs picks the
    /// change up on its next reload.
    pub async fn update_schedule(&self, update: ScheduleUpdate) -> Result<ScheduleConfig, TrackerError> {
        let schedule = parse_cron(&update.cron_expression)?;

        let mut state = self.state.lock().await;
        let current = self.store.load_schedule().await?.unwrap_or_default();
        let config = current.with_update(&update, Utc::now());
        self.store.save_schedule(&config).await?;

        if state.is_started() {
            apply_sync(&mut state, &config, Some(schedule));
        } else {
            info!(
                cron = %config.cron_expression,
                enabled = config.enabled,
                "sync schedule saved"
            );
        }
        Ok(config)
    }

    /// Apply the persisted schedule if it differs from the running one.
    /// Returns whether anything changed.
    pub async fn reload(&self) -> Result<bool, TrackerError> {
        reload_from(self.store.as_ref(), &self.state).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            sync: state.sync.job.as_ref().map(Job::status),
            inactivity: state.inactivity.job.as_ref().map(Job::status),
        }
    }

    /// Stop both jobs and the watcher. Firings already running finish on their own.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        for job in [state.sync.job.take(), state.inactivity.job.take()].into_iter().flatten() {
            job.stop();
        }
        if let Some((stop, handle)) = state.watcher.take() {
            let _ = stop.send(true);
            drop(handle);
        }
        state.applied = None;
        info!("scheduler stopped");
    }

    fn spawn_watcher(&self) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(watch_schedule(
            self.store.clone(),
            Arc::downgrade(&self.state),
            self.reload_interval,
            stop_rx,
        ));
        (stop_tx, handle)
    }
}

/// Start, swap or stop the sync job to match `config`.
/// `schedule` must be the parsed expression whenever `config.enabled`.
fn apply_sync(state: &mut State, config: &ScheduleConfig, schedule: Option<Schedule>) {
    match schedule.filter(|_| config.enabled) {
        Some(schedule) => {
            if let Some(old) = replace_job(state, SlotKind::Sync, &config.cron_expression, schedule) {
                old.stop();
            }
            info!(
                cron = %config.cron_expression,
                frequency = %config.frequency,
                "sync schedule applied"
            );
        }
        None => {
            if let Some(old) = state.sync.job.take() {
                old.stop();
            }
            info!("sync schedule disabled");
        }
    }
    state.applied = Some(Applied::from(config));
}

async fn reload_from(store: &dyn Store, state: &Mutex<State>) -> Result<bool, TrackerError> {
    let mut state = state.lock().await;
    let Some(applied) = state.applied.clone() else {
        return Ok(false);
    };
    let config = store.load_schedule().await?.unwrap_or_default();
    if Applied::from(&config) == applied {
        return Ok(false);
    }

    let schedule = if config.enabled {
        match parse_cron(&config.cron_expression) {
            Ok(s) => Some(s),
            Err(e) => {
                // Recorded so the same bad row is reported once.
                warn!(
                    cron = %config.cron_expression,
                    error = %e,
                    "stored schedule is invalid; keeping current job"
                );
                state.applied = Some(Applied::from(&config));
                return Ok(false);
            }
        }
    } else {
        None
    };
    info!(cron = %config.cron_expression, enabled = config.enabled, "stored schedule changed; reloading");
    apply_sync(&mut state, &config, schedule);
    Ok(true)
}

async fn watch_schedule(
    store: Arc<dyn Store>,
    state: std::sync::Weak<Mutex<State>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.changed() => return,
        }
        if *stop.borrow() {
            return;
        }
        let Some(state) = state.upgrade() else {
            return;
        };
        if let Err(e) = reload_from(store.as_ref(), &state).await {
            warn!(error = %e, "schedule reload failed");
        }
    }
}

#[derive(Clone, Copy)]
enum SlotKind {
    Sync,
    Inactivity,
}

/// Spawn a new generation into `kind`'s slot and return the job it replaced.
fn replace_job(state: &mut State, kind: SlotKind, expression: &str, schedule: Schedule) -> Option<Job> {
    state.generation += 1;
    let generation = state.generation;
    let slot = match kind {
        SlotKind::Sync => &mut state.sync,
        SlotKind::Inactivity => &mut state.inactivity,
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let name = slot.task.name().to_string();
    let handle = tokio::spawn(run_job(
        name.clone(),
        schedule.clone(),
        slot.task.clone(),
        slot.firing.clone(),
        stop_rx,
    ));
    info!(job = %name, cron = %normalize_cron(expression), generation, "job started");

    slot.job.replace(Job {
        name,
        expression: expression.to_string(),
        schedule,
        generation,
        stop: stop_tx,
        handle,
    })
}

async fn run_job(
    name: String,
    schedule: Schedule,
    task: Arc<dyn ScheduledTask>,
    firing: Arc<Mutex<()>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let Some(next) = next_fire_after(&schedule, Utc::now()) else {
            warn!(job = %name, "schedule has no upcoming ticks; job exiting");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            // Fires on stop and when the scheduler is dropped.
            _ = stop.changed() => return,
        }
        if *stop.borrow() {
            return;
        }

        fire(&name, task.as_ref(), &firing).await;
    }
}

async fn fire(name: &str, task: &dyn ScheduledTask, firing: &Mutex<()>) {
    let _guard = firing.lock().await;
    let started = Instant::now();
    debug!(job = %name, "job firing");

    match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(Ok(())) => {
            info!(job = %name, elapsed_ms = started.elapsed().as_millis() as u64, "job completed");
        }
        Ok(Err(e)) => {
            error!(job = %name, error = %e, kind = e.kind(), "job failed");
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(job = %name, panic = %msg, "job panicked");
        }
    }
}
