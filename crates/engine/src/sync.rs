//! Per-entity and global synchronization against the activity provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use cfwatch_core::{
    ContestResult, DatasetSnapshot, Entity, EntityId, EntityUpdate, RatingSummary, Store,
    TrackerError,
};
use cfwatch_fetch::ActivitySource;

use crate::inactivity::{BatchReport, InactivityDetector, InactivityReport};

/// Ratings are a pure function of the contest list: the latest contest's new
/// rating, and the best new rating ever reached. Both 0 with no contests.
pub fn derive_ratings(contests: &[ContestResult]) -> RatingSummary {
    let current_rating = contests
        .iter()
        .max_by_key(|c| c.rated_at)
        .map(|c| c.new_rating)
        .unwrap_or(0);
    let max_rating = contests.iter().map(|c| c.new_rating).max().unwrap_or(0);
    RatingSummary {
        current_rating,
        max_rating,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub entity_id: EntityId,
    pub handle: String,
    pub current_rating: i32,
    pub max_rating: i32,
    pub contests: usize,
    pub submissions: usize,
    pub synced_at: DateTime<Utc>,
    /// `None` when the post-sync inactivity check failed.
    pub inactivity: Option<InactivityReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced(SyncReport),
    /// Another sync holds the entity's lease.
    Skipped { entity_id: EntityId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntitySyncOutcome {
    Synced { current_rating: i32, max_rating: i32 },
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySyncResult {
    pub entity_id: EntityId,
    pub handle: String,
    pub outcome: EntitySyncOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub total: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncSummary {
    fn from_results(results: &[EntitySyncResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for r in results {
            match r.outcome {
                EntitySyncOutcome::Synced { .. } => summary.synced += 1,
                EntitySyncOutcome::Skipped => summary.skipped += 1,
                EntitySyncOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<EntitySyncResult>,
    pub summary: SyncSummary,
    pub inactivity: BatchReport,
}

/// Entities in flight at once during [`SyncOrchestrator::sync_all`].
pub const DEFAULT_SYNC_CONCURRENCY: usize = 4;

pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    source: Arc<dyn ActivitySource>,
    detector: Arc<InactivityDetector>,
    lease: chrono::Duration,
    concurrency: usize,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ActivitySource>,
        detector: Arc<InactivityDetector>,
    ) -> Self {
        Self {
            store,
            source,
            detector,
            lease: chrono::Duration::minutes(15),
            concurrency: DEFAULT_SYNC_CONCURRENCY,
        }
    }

    /// How long a held sync flag blocks others before it counts as abandoned.
    pub fn with_lease(mut self, lease: std::time::Duration) -> Self {
        self.lease = chrono::Duration::from_std(lease).unwrap_or(self.lease);
        self
    }

    /// Cap on entities synced at once by a global run. A queued entity's
    /// lease is only taken once it leaves the queue, so the lease never ages
    /// while waiting behind the rest of the batch.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn detector(&self) -> &Arc<InactivityDetector> {
        &self.detector
    }

    /// Sync one entity. A held lease yields `Skipped` unless `force` is set.
    pub async fn sync_entity(&self, id: EntityId, force: bool) -> Result<SyncOutcome, TrackerError> {
        let Some(entity) = self
            .store
            .try_acquire_sync(id, Utc::now(), self.lease, force)
            .await?
        else {
            info!(entity_id = %id, "sync already in progress; skipping");
            return Ok(SyncOutcome::Skipped { entity_id: id });
        };

        let (entity, snapshot) = match self.fetch_and_commit(&entity).await {
            Ok(committed) => committed,
            Err(e) => {
                warn!(entity_id = %id, handle = %entity.handle, error = %e, "sync failed");
                self.release(id).await;
                return Err(e);
            }
        };

        info!(
            entity_id = %id,
            handle = %entity.handle,
            current_rating = entity.current_rating,
            max_rating = entity.max_rating,
            contests = snapshot.contests.len(),
            submissions = snapshot.submissions.len(),
            "entity synced"
        );

        let inactivity = match self.detector.check_entity(id, &snapshot.submissions).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(entity_id = %id, error = %e, "post-sync inactivity check failed");
                None
            }
        };

        Ok(SyncOutcome::Synced(SyncReport {
            entity_id: id,
            handle: entity.handle,
            current_rating: entity.current_rating,
            max_rating: entity.max_rating,
            contests: snapshot.contests.len(),
            submissions: snapshot.submissions.len(),
            synced_at: snapshot.fetched_at,
            inactivity,
        }))
    }

    async fn fetch_and_commit(
        &self,
        entity: &Entity,
    ) -> Result<(Entity, DatasetSnapshot), TrackerError> {
        let activity = self.source.fetch_all(&entity.handle).await?;
        let summary = derive_ratings(&activity.contests);
        let snapshot = DatasetSnapshot {
            entity_id: entity.id,
            handle: entity.handle.clone(),
            profile: activity.profile,
            contests: activity.contests,
            submissions: activity.submissions,
            fetched_at: Utc::now(),
        };
        let committed = self.store.commit_sync(snapshot.clone(), summary).await?;
        Ok((committed, snapshot))
    }

    async fn release(&self, id: EntityId) {
        if let Err(e) = self.store.update_entity(id, EntityUpdate::ReleaseSync).await {
            error!(entity_id = %id, error = %e, "failed to release sync lease");
        }
    }

    /// Sync every entity, then run one inactivity pass over those that synced.
    pub async fn sync_all(&self) -> Result<GlobalSyncReport, TrackerError> {
        let started_at = Utc::now();
        let entities = self.store.list_entities().await?;
        info!(
            entities = entities.len(),
            concurrency = self.concurrency,
            "global sync started"
        );

        let results: Vec<EntitySyncResult> = stream::iter(entities.into_iter().map(|entity| async move {
            let outcome = match self.sync_entity(entity.id, false).await {
                Ok(SyncOutcome::Synced(report)) => EntitySyncOutcome::Synced {
                    current_rating: report.current_rating,
                    max_rating: report.max_rating,
                },
                Ok(SyncOutcome::Skipped { .. }) => EntitySyncOutcome::Skipped,
                Err(e) => EntitySyncOutcome::Failed {
                    error: e.to_string(),
                },
            };
            EntitySyncResult {
                entity_id: entity.id,
                handle: entity.handle.clone(),
                outcome,
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;

        let finished_at = Utc::now();
        if let Err(e) = self.store.record_global_run(finished_at).await {
            error!(error = %e, "failed to record global run time");
        }

        let mut batch = Vec::new();
        for r in &results {
            if !matches!(r.outcome, EntitySyncOutcome::Synced { .. }) {
                continue;
            }
            match self.store.get_snapshot(r.entity_id).await {
                Ok(Some(snapshot)) => batch.push((r.entity_id, snapshot.submissions)),
                Ok(None) => warn!(entity_id = %r.entity_id, "synced entity has no snapshot"),
                Err(e) => warn!(entity_id = %r.entity_id, error = %e, "failed to load snapshot"),
            }
        }
        let inactivity = self.detector.batch_check(batch).await;

        let summary = SyncSummary::from_results(&results);
        info!(
            total = summary.total,
            synced = summary.synced,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
            "global sync complete"
        );

        Ok(GlobalSyncReport {
            started_at,
            finished_at,
            results,
            summary,
            inactivity,
        })
    }
}
