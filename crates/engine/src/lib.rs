//! Sync orchestration and inactivity detection.
//!
//! [`SyncOrchestrator`] pulls provider data through an [`ActivitySource`],
//! commits snapshots and rating summaries, and hands fresh submissions to the
//! [`InactivityDetector`], which classifies entities and sends throttled
//! reminders.
//!
//! [`ActivitySource`]: cfwatch_fetch::ActivitySource

pub mod inactivity;
pub mod sync;

pub use inactivity::{
    classify, Activity, BatchEntry, BatchEntryOutcome, BatchReport, BatchSummary,
    InactivityDetector, InactivityReport, ReminderOutcome, INACTIVITY_THRESHOLD_DAYS,
};
pub use sync::{
    derive_ratings, EntitySyncOutcome, EntitySyncResult, GlobalSyncReport, SyncOrchestrator,
    SyncOutcome, SyncReport, SyncSummary, DEFAULT_SYNC_CONCURRENCY,
};
