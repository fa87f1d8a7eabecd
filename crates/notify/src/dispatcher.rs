//! Renders reminders and hands them to the configured [`Mailer`].
//!
//! Delivery problems come back as [`DeliveryOutcome::Failed`]; nothing in
//! `send` returns an error to the caller.

use std::sync::Arc;

use crate::templating::{ReminderContext, TemplateRenderer};
use crate::traits::{DeliveryOutcome, Mailer, Notification, NotifyError, Recipient};

pub struct NotificationDispatcher {
    mailer: Arc<dyn Mailer>,
    renderer: TemplateRenderer,
}

impl NotificationDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            renderer: TemplateRenderer::new(),
        }
    }

    pub fn channel_name(&self) -> &str {
        self.mailer.channel_name()
    }

    /// Render and deliver an inactivity reminder.
    pub async fn send(&self, recipient: &Recipient, inactive_days: Option<i64>) -> DeliveryOutcome {
        let start = std::time::Instant::now();
        let result = self.deliver(recipient, inactive_days).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(message_id) => {
                tracing::info!(
                    handle = %recipient.handle,
                    channel = self.mailer.channel_name(),
                    duration_ms,
                    "reminder sent"
                );
                DeliveryOutcome::Sent { message_id }
            }
            Err(e) => {
                tracing::warn!(
                    handle = %recipient.handle,
                    channel = self.mailer.channel_name(),
                    error = %e,
                    duration_ms,
                    "reminder delivery failed"
                );
                DeliveryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        inactive_days: Option<i64>,
    ) -> Result<Option<String>, NotifyError> {
        let to = recipient
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| NotifyError::MissingRecipient(recipient.handle.clone()))?;

        let rendered = self
            .renderer
            .render_reminder(&ReminderContext::new(recipient, inactive_days))?;

        let notification = Notification {
            to: to.to_string(),
            subject: rendered.subject,
            body: rendered.body,
        };
        self.mailer.send(&notification).await
    }

    /// Diagnostics only; never consulted before a send.
    pub async fn verify(&self) -> Result<(), NotifyError> {
        let result = self.mailer.verify().await;
        match &result {
            Ok(()) => tracing::info!(channel = self.mailer.channel_name(), "mail transport ready"),
            Err(e) => tracing::warn!(channel = self.mailer.channel_name(), error = %e, "mail transport check failed"),
        }
        result
    }
}
