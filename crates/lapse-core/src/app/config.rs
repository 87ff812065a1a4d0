//! SweepConfig - 起動時に一度だけ読む設定
//!
//! All fields carry defaults so a deployment only spells out what it changes.
//! Sources, later ones win:
//! 1. built-in defaults
//! 2. a TOML file (`SweepConfig::from_toml_file`)
//! 3. `LAPSE_*` environment variables (`SweepConfig::apply_env`)

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cron::{CronError, CronSchedule};
use crate::sweep::{BackoffPolicy, DispatchPolicy, ExecutorSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("invalid schedule: {0}")]
    Schedule(#[from] CronError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Master switch. When off the scheduler never loops.
    pub enabled: bool,

    /// Cron expression (`MIN HOUR DOM MON DOW` or `@hourly` style macro).
    pub schedule: String,

    pub batch_size: usize,
    pub batch_pause_ms: u64,

    /// Maximum leads per owner notification.
    pub per_owner_cap: usize,
    pub cooldown_minutes: u64,

    /// Consecutive failures before backoff kicks in.
    pub max_consecutive_errors: u32,
    pub initial_backoff_minutes: u64,
    pub max_backoff_minutes: u64,

    pub execution_deadline_secs: u64,
    pub lock_timeout_secs: u64,

    pub notification_ttl_days: u64,
    pub notice_backlog_limit: usize,

    /// Stop the scheduler on an unclassified error instead of backing off.
    pub fail_stop_on_unexpected: bool,

    /// Per-connection buffer of the live push channel.
    pub push_buffer: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: "*/5 * * * *".to_string(),
            batch_size: 100,
            batch_pause_ms: 100,
            per_owner_cap: 10,
            cooldown_minutes: 60,
            max_consecutive_errors: 3,
            initial_backoff_minutes: 30,
            max_backoff_minutes: 1440,
            execution_deadline_secs: 300,
            lock_timeout_secs: 10,
            notification_ttl_days: 30,
            notice_backlog_limit: 1000,
            fail_stop_on_unexpected: true,
            push_buffer: 64,
        }
    }
}

impl SweepConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `LAPSE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (`LAPSE_BATCH_SIZE`, ...).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(schedule) = lookup("LAPSE_SCHEDULE") {
            self.schedule = schedule;
        }
        override_parsed(&lookup, "LAPSE_ENABLED", &mut self.enabled)?;
        override_parsed(&lookup, "LAPSE_BATCH_SIZE", &mut self.batch_size)?;
        override_parsed(&lookup, "LAPSE_BATCH_PAUSE_MS", &mut self.batch_pause_ms)?;
        override_parsed(&lookup, "LAPSE_PER_OWNER_CAP", &mut self.per_owner_cap)?;
        override_parsed(&lookup, "LAPSE_COOLDOWN_MINUTES", &mut self.cooldown_minutes)?;
        override_parsed(&lookup, "LAPSE_MAX_CONSECUTIVE_ERRORS", &mut self.max_consecutive_errors)?;
        override_parsed(&lookup, "LAPSE_INITIAL_BACKOFF_MINUTES", &mut self.initial_backoff_minutes)?;
        override_parsed(&lookup, "LAPSE_MAX_BACKOFF_MINUTES", &mut self.max_backoff_minutes)?;
        override_parsed(&lookup, "LAPSE_EXECUTION_DEADLINE_SECS", &mut self.execution_deadline_secs)?;
        override_parsed(&lookup, "LAPSE_LOCK_TIMEOUT_SECS", &mut self.lock_timeout_secs)?;
        override_parsed(&lookup, "LAPSE_NOTIFICATION_TTL_DAYS", &mut self.notification_ttl_days)?;
        override_parsed(&lookup, "LAPSE_NOTICE_BACKLOG_LIMIT", &mut self.notice_backlog_limit)?;
        override_parsed(&lookup, "LAPSE_FAIL_STOP_ON_UNEXPECTED", &mut self.fail_stop_on_unexpected)?;
        override_parsed(&lookup, "LAPSE_PUSH_BUFFER", &mut self.push_buffer)?;
        Ok(())
    }

    /// Reject configurations the sweep cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cron_schedule()?;
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.per_owner_cap == 0 {
            return Err(ConfigError::Invalid("per_owner_cap must be at least 1".into()));
        }
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_errors must be at least 1".into(),
            ));
        }
        if self.initial_backoff_minutes > self.max_backoff_minutes {
            return Err(ConfigError::Invalid(format!(
                "initial_backoff_minutes ({}) exceeds max_backoff_minutes ({})",
                self.initial_backoff_minutes, self.max_backoff_minutes
            )));
        }
        if self.execution_deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "execution_deadline_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn cron_schedule(&self) -> Result<CronSchedule, CronError> {
        self.schedule.parse()
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            threshold: self.max_consecutive_errors,
            initial: minutes(self.initial_backoff_minutes),
            max: minutes(self.max_backoff_minutes),
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            per_owner_cap: self.per_owner_cap,
            cooldown: minutes(self.cooldown_minutes),
            notification_ttl: minutes(self.notification_ttl_days.saturating_mul(24 * 60)),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
            execution_deadline: Duration::from_secs(self.execution_deadline_secs),
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            notice_backlog_limit: self.notice_backlog_limit,
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(());
    };
    *slot = value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = SweepConfig::default();
        config.validate().unwrap();
        assert_eq!(config.backoff_policy().threshold, 3);
        assert_eq!(config.backoff_policy().max, Duration::from_secs(1440 * 60));
        assert_eq!(config.dispatch_policy().cooldown, Duration::from_secs(3600));
        assert_eq!(
            config.executor_settings().execution_deadline,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn toml_overrides_only_what_it_names() {
        let config = SweepConfig::from_toml_str(
            r#"
            schedule = "@hourly"
            per_owner_cap = 5
            fail_stop_on_unexpected = false
            "#,
        )
        .unwrap();

        assert_eq!(config.schedule, "@hourly");
        assert_eq!(config.per_owner_cap, 5);
        assert!(!config.fail_stop_on_unexpected);
        assert_eq!(config.batch_size, 100);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_types_are_rejected() {
        let err = SweepConfig::from_toml_str("batch_size = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LAPSE_ENABLED", "false"),
            ("LAPSE_BATCH_SIZE", " 250 "),
            ("LAPSE_SCHEDULE", "0 * * * *"),
        ]);
        let mut config = SweepConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.schedule, "0 * * * *");
    }

    #[test]
    fn malformed_env_value_names_the_key() {
        let mut config = SweepConfig::default();
        let err = config
            .apply_overrides(|key| (key == "LAPSE_PER_OWNER_CAP").then(|| "ten".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LAPSE_PER_OWNER_CAP"));
    }

    #[test]
    fn validation_catches_bad_values() {
        let config = SweepConfig {
            initial_backoff_minutes: 120,
            max_backoff_minutes: 60,
            ..SweepConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SweepConfig {
            schedule: "every tuesday".into(),
            ..SweepConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Schedule(_))));

        let config = SweepConfig {
            batch_size: 0,
            ..SweepConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
