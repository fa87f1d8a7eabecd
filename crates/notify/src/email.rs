//! SMTP mailer via `lettre` with TLS support.
//!
//! Supports STARTTLS, implicit TLS on port 465, and plain connections for
//! local relays.

use cfwatch_core::config::SmtpConfig;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use crate::traits::{Mailer, Notification, NotifyError};

/// Sends reminders as plain-text emails via SMTP.
#[derive(Debug)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    /// Right-hand side of generated Message-ID headers.
    domain: String,
}

impl SmtpMailer {
    /// Build an `SmtpMailer` from SMTP configuration.
    ///
    /// Port 465 uses implicit TLS. Any other port uses STARTTLS when `tls` is
    /// set and a plain connection otherwise. Credentials are attached only
    /// when both username and password are present.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let from = config
            .from
            .as_deref()
            .ok_or_else(|| NotifyError::Config("EMAIL_FROM or SMTP_USERNAME is required".to_string()))?;
        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let mut builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(config.port)
        } else if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(config.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let domain = from_mailbox.email.domain().to_string();
        Ok(Self {
            transport: builder.build(),
            from: from_mailbox,
            domain,
        })
    }

    fn next_message_id(&self) -> String {
        format!("<{}@{}>", uuid::Uuid::new_v4(), self.domain)
    }
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, notification: &Notification) -> Result<Option<String>, NotifyError> {
        let to: Mailbox = notification
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Smtp(format!("invalid recipient: {e}")))?;
        let message_id = self.next_message_id();

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .message_id(Some(message_id.clone()))
            .subject(&notification.subject)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::info!(
            channel = "smtp",
            subject = %notification.subject,
            %message_id,
            "reminder delivered"
        );

        Ok(Some(message_id))
    }

    async fn verify(&self) -> Result<(), NotifyError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(NotifyError::Smtp("server did not accept the connection".to_string())),
            Err(e) => Err(NotifyError::Smtp(e.to_string())),
        }
    }

    fn channel_name(&self) -> &str {
        "smtp"
    }
}
