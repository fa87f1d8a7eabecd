//! Provider response shapes and their conversion into domain records.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use cfwatch_core::{ContestResult, Profile, SubmissionRecord};

/// Every provider response is wrapped in `{status, comment?, result?}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserInfo {
    pub handle: String,
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub max_rating: Option<i32>,
    #[serde(default)]
    pub rank: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RatingChange {
    pub contest_id: i64,
    #[serde(default)]
    pub contest_name: String,
    pub rank: i64,
    pub old_rating: i32,
    pub new_rating: i32,
    pub rating_update_time_seconds: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Problem {
    #[serde(default)]
    pub contest_id: Option<i64>,
    #[serde(default)]
    pub index: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Submission {
    pub id: i64,
    pub problem: Problem,
    #[serde(default)]
    pub verdict: Option<String>,
    pub creation_time_seconds: i64,
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl From<UserInfo> for Profile {
    fn from(u: UserInfo) -> Self {
        Self {
            handle: u.handle,
            rating: u.rating,
            max_rating: u.max_rating,
            rank: u.rank,
        }
    }
}

impl From<RatingChange> for ContestResult {
    fn from(c: RatingChange) -> Self {
        Self {
            contest_id: c.contest_id,
            contest_name: c.contest_name,
            rank: c.rank,
            old_rating: c.old_rating,
            new_rating: c.new_rating,
            rated_at: from_epoch(c.rating_update_time_seconds),
        }
    }
}

impl From<Submission> for SubmissionRecord {
    fn from(s: Submission) -> Self {
        let problem_id = match s.problem.contest_id {
            Some(contest) => format!("{contest}{}", s.problem.index),
            None => s.problem.index,
        };
        Self {
            id: s.id,
            problem_id,
            verdict: s.verdict,
            submitted_at: from_epoch(s.creation_time_seconds),
        }
    }
}
