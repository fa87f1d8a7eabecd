//! The two jobs the tracker runs on a timer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use cfwatch_core::TrackerError;
use cfwatch_engine::{InactivityDetector, SyncOrchestrator};

use crate::task::ScheduledTask;

/// Sync every entity, then run the inactivity pass over the fresh data.
pub struct GlobalSyncTask {
    orchestrator: Arc<SyncOrchestrator>,
}

impl GlobalSyncTask {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ScheduledTask for GlobalSyncTask {
    fn name(&self) -> &str {
        "global-sync"
    }

    async fn run(&self) -> Result<(), TrackerError> {
        let report = self.orchestrator.sync_all().await?;
        info!(
            synced = report.summary.synced,
            skipped = report.summary.skipped,
            failed = report.summary.failed,
            "scheduled sync finished"
        );
        Ok(())
    }
}

/// Re-check stored snapshots without touching the provider.
pub struct InactivityTask {
    detector: Arc<InactivityDetector>,
}

impl InactivityTask {
    pub fn new(detector: Arc<InactivityDetector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl ScheduledTask for InactivityTask {
    fn name(&self) -> &str {
        "inactivity-check"
    }

    async fn run(&self) -> Result<(), TrackerError> {
        let report = self.detector.check_stored().await?;
        info!(
            checked = report.summary.total,
            inactive = report.summary.inactive_count,
            errors = report.summary.error_count,
            "scheduled inactivity check finished"
        );
        Ok(())
    }
}
