//! Mailer trait definition and shared delivery types.

use cfwatch_core::{Entity, ReminderResolution, TrackerError};

/// Errors that can occur while preparing or delivering a reminder.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("recipient '{0}' has no email address")]
    MissingRecipient(String),
}

impl From<NotifyError> for TrackerError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::Config(msg) => TrackerError::Config(msg),
            other => TrackerError::Delivery(other.to_string()),
        }
    }
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// The slice of an entity a reminder talks about.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Recipient {
    pub name: String,
    pub email: Option<String>,
    pub handle: String,
    pub current_rating: i32,
    pub max_rating: i32,
}

impl From<&Entity> for Recipient {
    fn from(e: &Entity) -> Self {
        Self {
            name: e.name.clone(),
            email: e.email.clone(),
            handle: e.handle.clone(),
            current_rating: e.current_rating,
            max_rating: e.max_rating,
        }
    }
}

/// Outcome of one delivery attempt. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Sent { message_id: Option<String> },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

impl From<DeliveryOutcome> for ReminderResolution {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Sent { message_id } => ReminderResolution::Sent { message_id },
            DeliveryOutcome::Failed { error } => ReminderResolution::Failed { error },
        }
    }
}

/// Transport that actually moves a message.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message, returning the transport's message id when known.
    async fn send(&self, notification: &Notification) -> Result<Option<String>, NotifyError>;

    /// Check that the transport is reachable and accepts our credentials.
    async fn verify(&self) -> Result<(), NotifyError>;

    /// Human-readable name for this transport (e.g., "smtp").
    fn channel_name(&self) -> &str;
}

/// Stand-in used when no SMTP sender is configured; every send fails.
#[derive(Debug, Default)]
pub struct UnconfiguredMailer;

#[async_trait::async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, _notification: &Notification) -> Result<Option<String>, NotifyError> {
        Err(NotifyError::Config("SMTP sender is not configured".to_string()))
    }

    async fn verify(&self) -> Result<(), NotifyError> {
        Err(NotifyError::Config("SMTP sender is not configured".to_string()))
    }

    fn channel_name(&self) -> &str {
        "unconfigured"
    }
}
