use async_trait::async_trait;

use cfwatch_core::{ContestResult, Profile, SubmissionRecord};

use crate::error::FetchError;

/// Everything one sync needs from the provider for a single handle.
#[derive(Debug, Clone)]
pub struct FetchedActivity {
    pub profile: Profile,
    pub contests: Vec<ContestResult>,
    pub submissions: Vec<SubmissionRecord>,
}

/// Source of contest and submission history for a handle.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch_all(&self, handle: &str) -> Result<FetchedActivity, FetchError>;
}
