//! Codeforces HTTP client behind the shared [`RateGovernor`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use cfwatch_core::config::ProviderConfig;
use cfwatch_core::{ContestResult, Profile, SubmissionRecord};

use crate::error::FetchError;
use crate::gate::RateGovernor;
use crate::source::{ActivitySource, FetchedActivity};
use crate::wire::{Envelope, RatingChange, Submission, UserInfo};

/// Longest slice of a non-JSON error body carried into the error message.
const MAX_ERROR_BODY: usize = 200;

pub struct CodeforcesClient {
    client: reqwest::Client,
    base_url: String,
    gate: RateGovernor,
    submissions_count: u32,
}

impl CodeforcesClient {
    /// Build a client that shares `gate` with every other provider caller.
    pub fn new(config: &ProviderConfig, gate: RateGovernor) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(concat!("cfwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        debug!(base_url = %config.base_url, ?gate, "provider client ready");
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            gate,
            submissions_count: config.submissions_count,
        })
    }

    /// Build a client with its own gate from `config.min_interval_ms`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, FetchError> {
        Self::new(config, RateGovernor::new(config.min_interval()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        self.gate.acquire().await;

        let url = format!("{}/{}", self.base_url, method);
        debug!(%url, "provider request");
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;

        // Failed calls still carry the JSON envelope, usually with a 400 status.
        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) if envelope.is_ok() => envelope
                .result
                .ok_or_else(|| FetchError::upstream(method, "OK response without result")),
            Ok(envelope) => {
                let message = envelope
                    .comment
                    .unwrap_or_else(|| format!("status {}", envelope.status));
                warn!(method, %status, comment = %message, "provider returned non-OK status");
                Err(FetchError::upstream(method, message))
            }
            Err(_) if !status.is_success() => {
                let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
                Err(FetchError::upstream(method, format!("HTTP {status}: {snippet}")))
            }
            Err(e) => Err(FetchError::upstream(method, format!("malformed response: {e}"))),
        }
    }

    pub async fn user_info(&self, handle: &str) -> Result<Profile, FetchError> {
        let users: Vec<UserInfo> = self
            .call("user.info", &[("handles", handle.to_string())])
            .await?;
        users
            .into_iter()
            .next()
            .map(Profile::from)
            .ok_or_else(|| FetchError::NotFound(handle.to_string()))
    }

    pub async fn rating_history(&self, handle: &str) -> Result<Vec<ContestResult>, FetchError> {
        let changes: Vec<RatingChange> = self
            .call("user.rating", &[("handle", handle.to_string())])
            .await?;
        Ok(changes.into_iter().map(ContestResult::from).collect())
    }

    pub async fn submissions(&self, handle: &str) -> Result<Vec<SubmissionRecord>, FetchError> {
        let subs: Vec<Submission> = self
            .call(
                "user.status",
                &[
                    ("handle", handle.to_string()),
                    ("from", "1".to_string()),
                    ("count", self.submissions_count.to_string()),
                ],
            )
            .await?;
        Ok(subs.into_iter().map(SubmissionRecord::from).collect())
    }
}

#[async_trait]
impl ActivitySource for CodeforcesClient {
    async fn fetch_all(&self, handle: &str) -> Result<FetchedActivity, FetchError> {
        let started = std::time::Instant::now();
        let (profile, contests, submissions) = tokio::try_join!(
            self.user_info(handle),
            self.rating_history(handle),
            self.submissions(handle),
        )?;
        debug!(
            handle,
            contests = contests.len(),
            submissions = submissions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched provider activity"
        );
        Ok(FetchedActivity {
            profile,
            contests,
            submissions,
        })
    }
}

impl std::fmt::Debug for CodeforcesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeforcesClient")
            .field("base_url", &self.base_url)
            .field("gate", &self.gate)
            .finish()
    }
}

/// Convenience for tests and tools: a provider config pointing at `base_url`.
pub fn provider_config(base_url: &str, min_interval: Duration) -> ProviderConfig {
    ProviderConfig {
        base_url: base_url.to_string(),
        min_interval_ms: min_interval.as_millis() as u64,
        timeout_secs: 10,
        connect_timeout_secs: 5,
        submissions_count: 10_000,
    }
}
