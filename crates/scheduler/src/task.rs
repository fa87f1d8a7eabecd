use async_trait::async_trait;

use cfwatch_core::TrackerError;

/// A unit of work a cron job fires.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), TrackerError>;
}
