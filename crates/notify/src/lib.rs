//! Reminder delivery for inactive entities.
//!
//! This crate provides:
//! - `Mailer` trait for pluggable transports
//! - `SmtpMailer`, the lettre-backed SMTP implementation
//! - Minijinja rendering of the reminder text
//! - `NotificationDispatcher`, which turns every send into a `DeliveryOutcome`

pub mod dispatcher;
pub mod email;
pub mod templating;
pub mod traits;

pub use dispatcher::NotificationDispatcher;
pub use email::SmtpMailer;
pub use traits::{DeliveryOutcome, Mailer, Notification, NotifyError, Recipient, UnconfiguredMailer};
