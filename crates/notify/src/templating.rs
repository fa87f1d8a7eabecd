//! Minijinja rendering of the inactivity reminder.
//!
//! The subject and body are fixed built-in templates; a fresh
//! [`minijinja::Environment`] is built per render call.

use crate::traits::{NotifyError, Recipient};

const REMINDER_SUBJECT: &str = "Time to get back to problem solving, {{ name }}!";

const REMINDER_BODY: &str = "\
Hey {{ name }}!

{% if inactive_days is none -%}
We could not find any accepted submission on Codeforces for your handle yet.
{%- else -%}
We noticed you haven't had an accepted submission on Codeforces in the last {{ inactive_days }} days.
{%- endif %}
Don't let your problem-solving skills get rusty.

Your current stats:
  Handle:         {{ handle }}
  Current rating: {{ current_rating | rating }}
  Max rating:     {{ max_rating | rating }}

Consistency is key to improvement in competitive programming. Even one
problem a day makes a difference: https://codeforces.com/problemset

Quick tips to get back on track:
  - Start with easier problems to build momentum
  - Set a small daily goal
  - Focus on topics you find challenging
  - Join virtual contests to practice

Happy coding!

If you don't want to receive these reminders, please contact your administrator.
";

/// Values available to the reminder templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReminderContext {
    pub name: String,
    pub handle: String,
    pub current_rating: i32,
    pub max_rating: i32,
    /// `None` when the recipient never had an accepted submission.
    pub inactive_days: Option<i64>,
}

impl ReminderContext {
    pub fn new(recipient: &Recipient, inactive_days: Option<i64>) -> Self {
        Self {
            name: recipient.name.clone(),
            handle: recipient.handle.clone(),
            current_rating: recipient.current_rating,
            max_rating: recipient.max_rating,
            inactive_days,
        }
    }
}

/// A rendered subject and body pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReminder {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("rating", rating_filter);
        env
    }

    fn render(&self, template_str: &str, ctx: &ReminderContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    pub fn render_reminder(&self, ctx: &ReminderContext) -> Result<RenderedReminder, NotifyError> {
        Ok(RenderedReminder {
            subject: self.render(REMINDER_SUBJECT, ctx)?,
            body: self.render(REMINDER_BODY, ctx)?,
        })
    }
}

/// Unrated players carry rating 0.
fn rating_filter(value: i64) -> String {
    if value == 0 {
        "Unrated".to_string()
    } else {
        value.to_string()
    }
}
