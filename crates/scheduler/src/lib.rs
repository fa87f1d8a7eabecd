//! Cron-driven execution of the global sync and the inactivity pass.

pub mod cron;
pub mod runner;
pub mod task;
pub mod tasks;

pub use runner::{
    JobStatus, Scheduler, SchedulerStatus, DEFAULT_INACTIVITY_CRON, DEFAULT_RELOAD_INTERVAL,
};
pub use task::ScheduledTask;
pub use tasks::{GlobalSyncTask, InactivityTask};
