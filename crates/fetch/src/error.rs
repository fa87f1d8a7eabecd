use cfwatch_core::TrackerError;

/// Failure classes of a provider fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The profile lookup returned no user for the handle.
    #[error("handle '{0}' not found on provider")]
    NotFound(String),

    /// Provider answered with a non-OK status; carries its comment.
    #[error("provider error on {method}: {message}")]
    Upstream { method: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    pub fn upstream(method: &str, message: impl Into<String>) -> Self {
        Self::Upstream {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

impl From<FetchError> for TrackerError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound(handle) => TrackerError::HandleNotFound(handle),
            other => TrackerError::Upstream(other.to_string()),
        }
    }
}
