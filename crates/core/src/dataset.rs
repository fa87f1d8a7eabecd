use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// Verdict string the provider uses for an accepted submission.
pub const ACCEPTED_VERDICT: &str = "OK";

/// Public profile as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub handle: String,
    pub rating: Option<i32>,
    pub max_rating: Option<i32>,
    pub rank: Option<String>,
}

/// One rated contest participation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestResult {
    pub contest_id: i64,
    pub contest_name: String,
    pub rank: i64,
    pub old_rating: i32,
    pub new_rating: i32,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    /// Contest id and problem index joined, e.g. `1520A`.
    pub problem_id: String,
    /// `None` while the submission is still being judged.
    pub verdict: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn is_accepted(&self) -> bool {
        self.verdict.as_deref() == Some(ACCEPTED_VERDICT)
    }
}

/// Cached copy of an entity's provider history, replaced wholesale per sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub entity_id: EntityId,
    pub handle: String,
    pub profile: Profile,
    pub contests: Vec<ContestResult>,
    pub submissions: Vec<SubmissionRecord>,
    pub fetched_at: DateTime<Utc>,
}
