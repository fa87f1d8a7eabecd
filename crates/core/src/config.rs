use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub provider: ProviderConfig,
    pub smtp: SmtpConfig,
    pub postgres: PostgresConfig,
    pub tracker: TrackerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CFWATCH_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CFWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            provider: ProviderConfig::from_env_profiled(p),
            smtp: SmtpConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            tracker: TrackerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  provider:    url={}, min_interval={}ms, timeout={}s",
            self.provider.base_url,
            self.provider.min_interval_ms,
            self.provider.timeout_secs
        );
        tracing::info!(
            "  smtp:        host={}:{}, from={}",
            self.smtp.host,
            self.smtp.port,
            self.smtp.from.as_deref().unwrap_or("(none)")
        );
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  tracker:     inactivity_cron={}, reminder_pause={}ms, sync_lease={}s, sync_concurrency={}",
            self.tracker.inactivity_cron,
            self.tracker.reminder_pause_ms,
            self.tracker.sync_lease_secs,
            self.tracker.sync_concurrency
        );
    }

    /// Redacted view printed by `cfwatch config` (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "provider": {
                "base_url": self.provider.base_url,
                "min_interval_ms": self.provider.min_interval_ms,
                "timeout_secs": self.provider.timeout_secs,
            },
            "smtp": {
                "host": self.smtp.host,
                "port": self.smtp.port,
                "tls": self.smtp.tls,
                "configured": self.smtp.is_configured(),
            },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "tracker": {
                "inactivity_cron": self.tracker.inactivity_cron,
                "reminder_pause_ms": self.tracker.reminder_pause_ms,
                "sync_lease_secs": self.tracker.sync_lease_secs,
                "sync_concurrency": self.tracker.sync_concurrency,
                "schedule_reload_secs": self.tracker.schedule_reload_secs,
                "sync_on_register": self.tracker.sync_on_register,
            },
        })
    }
}

// ── Provider (Codeforces API) ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Minimum spacing between any two outbound calls, across all handles.
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Page size for the submissions endpoint.
    pub submissions_count: u32,
}

impl ProviderConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_or(p, "CF_API_URL", "https://codeforces.com/api"),
            min_interval_ms: profiled_env_u64(p, "CF_MIN_INTERVAL_MS", 1000),
            timeout_secs: profiled_env_u64(p, "CF_TIMEOUT_SECS", 30),
            connect_timeout_secs: profiled_env_u64(p, "CF_CONNECT_TIMEOUT_SECS", 10),
            submissions_count: profiled_env_u32(p, "CF_SUBMISSIONS_COUNT", 10_000),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ── SMTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Sender address; falls back to the username like most SMTP relays expect.
    pub from: Option<String>,
}

impl SmtpConfig {
    fn from_env_profiled(p: &str) -> Self {
        let username = profiled_env_opt(p, "SMTP_USERNAME");
        Self {
            host: profiled_env_or(p, "SMTP_HOST", "smtp.gmail.com"),
            port: profiled_env_u16(p, "SMTP_PORT", 587),
            tls: profiled_env_or(p, "SMTP_TLS", "true") == "true",
            password: profiled_env_opt(p, "SMTP_PASSWORD"),
            from: profiled_env_opt(p, "EMAIL_FROM").or_else(|| username.clone()),
            username,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.from.is_some()
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "cfwatch"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Tracker tuning ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Fixed schedule of the nightly inactivity pass.
    pub inactivity_cron: String,
    /// Pause after each inactive detection in a batch pass.
    pub reminder_pause_ms: u64,
    /// A sync flag older than this is considered abandoned and may be reclaimed.
    pub sync_lease_secs: u64,
    /// Entities synced at once during a global run.
    pub sync_concurrency: usize,
    /// How often a running daemon re-reads the persisted schedule.
    pub schedule_reload_secs: u64,
    /// Kick off a background sync right after an entity is registered.
    pub sync_on_register: bool,
}

impl TrackerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            inactivity_cron: profiled_env_or(p, "INACTIVITY_CRON", "0 0 * * *"),
            reminder_pause_ms: profiled_env_u64(p, "REMINDER_PAUSE_MS", 2000),
            sync_lease_secs: profiled_env_u64(p, "SYNC_LEASE_SECS", 15 * 60),
            sync_concurrency: profiled_env_u32(p, "SYNC_CONCURRENCY", 4).max(1) as usize,
            schedule_reload_secs: profiled_env_u64(p, "SCHEDULE_RELOAD_SECS", 30),
            sync_on_register: profiled_env_or(p, "SYNC_ON_REGISTER", "true") == "true",
        }
    }

    pub fn reminder_pause(&self) -> Duration {
        Duration::from_millis(self.reminder_pause_ms)
    }

    pub fn sync_lease(&self) -> Duration {
        Duration::from_secs(self.sync_lease_secs)
    }

    pub fn schedule_reload(&self) -> Duration {
        Duration::from_secs(self.schedule_reload_secs.max(1))
    }
}
