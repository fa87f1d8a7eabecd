use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default sync schedule: 2 AM daily.
pub const DEFAULT_SYNC_CRON: &str = "0 2 * * *";

/// Human label attached to the sync schedule. Informational only; the cron
/// expression is what drives firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown frequency '{other}' (expected daily, weekly or monthly)")),
        }
    }
}

/// Singleton sync schedule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub cron_expression: String,
    pub frequency: Frequency,
    pub enabled: bool,
    pub last_global_run_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron_expression: DEFAULT_SYNC_CRON.to_string(),
            frequency: Frequency::Daily,
            enabled: true,
            last_global_run_at: None,
            updated_at: None,
        }
    }
}

/// A requested change to the schedule. Validated before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub cron_expression: String,
    pub frequency: Frequency,
    pub enabled: bool,
}

impl ScheduleConfig {
    /// Produce the config that results from applying `update`, keeping run history.
    pub fn with_update(&self, update: &ScheduleUpdate, now: DateTime<Utc>) -> Self {
        Self {
            cron_expression: update.cron_expression.trim().to_string(),
            frequency: update.frequency,
            enabled: update.enabled,
            last_global_run_at: self.last_global_run_at,
            updated_at: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_parses_case_insensitively() {
        assert_eq!("Weekly".parse::<Frequency>(), Ok(Frequency::Weekly));
        assert!("hourly".parse::<Frequency>().is_err());
    }

    #[test]
    fn frequency_serializes_lowercase() {
        let json = serde_json::to_string(&Frequency::Monthly).unwrap();
        assert_eq!(json, "\"monthly\"");
    }

    #[test]
    fn update_keeps_last_run() {
        let last = Utc::now();
        let cfg = ScheduleConfig {
            last_global_run_at: Some(last),
            ..ScheduleConfig::default()
        };
        let next = cfg.with_update(
            &ScheduleUpdate {
                cron_expression: " 0 4 * * 1 ".into(),
                frequency: Frequency::Weekly,
                enabled: false,
            },
            Utc::now(),
        );
        assert_eq!(next.cron_expression, "0 4 * * 1");
        assert_eq!(next.last_global_run_at, Some(last));
        assert!(!next.enabled);
    }
}
