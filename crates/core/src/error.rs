use thiserror::Error;
use uuid::Uuid;

/// Error taxonomy shared by every cfwatch crate.
///
/// Crate-local errors (`FetchError`, `NotifyError`) convert into this type at
/// the boundary where the engine consumes them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Entity not found: {0}")]
    EntityNotFound(Uuid),

    #[error("Handle not found on provider: {0}")]
    HandleNotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sync already in progress for entity {0}")]
    Concurrency(Uuid),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrackerError {
    /// Whether this error means the entity or its external handle is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_) | Self::HandleNotFound(_))
    }

    /// Short machine-readable label, used in structured logs and result lists.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EntityNotFound(_) | Self::HandleNotFound(_) => "not_found",
            Self::Upstream(_) => "upstream",
            Self::Validation(_) => "validation",
            Self::Concurrency(_) => "concurrency",
            Self::Delivery(_) => "delivery",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
        }
    }
}

impl From<sqlx::Error> for TrackerError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TrackerError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Storage(format!("migration failed: {e}"))
    }
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_covers_entity_and_handle() {
        assert!(TrackerError::EntityNotFound(Uuid::nil()).is_not_found());
        assert!(TrackerError::HandleNotFound("tourist".into()).is_not_found());
        assert!(!TrackerError::Upstream("boom".into()).is_not_found());
    }

    #[test]
    fn kind_labels() {
        assert_eq!(TrackerError::Concurrency(Uuid::nil()).kind(), "concurrency");
        assert_eq!(TrackerError::Delivery("smtp".into()).kind(), "delivery");
        assert_eq!(TrackerError::HandleNotFound("x".into()).kind(), "not_found");
    }
}
