//! Directory configuration
//!
//! Plain structs with defaults, loadable from a JSON document (camelCase
//! keys, every field optional) and overridable from `DIRECTORY_*`
//! environment variables for the compactor binary.
//!
//! ```json
//! {
//!   "databasePath": "./data/directory.db",
//!   "lockTimeoutMs": 5000,
//!   "cacheTtlSecs": 300,
//!   "compaction": { "retentionDays": 30, "intervalHours": 24, "dailyTimeUtc": "03:00", "batchSize": 100 }
//! }
//! ```

use chrono::{Duration as ChronoDuration, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a JSON config file
pub const CONFIG_PATH_VAR: &str = "DIRECTORY_CONFIG";

/// Upper bound of `retentionDays` (100 years)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Upper bound of `intervalHours` (one year)
pub const MAX_INTERVAL_HOURS: u64 = 8_760;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {name}")]
    InvalidVar { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings of the background compaction job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionConfig {
    /// Days a department stays inactive before it is purged (default: 30)
    pub retention_days: i64,
    /// Hours between runs (default: 24)
    pub interval_hours: u64,
    /// "HH:MM" UTC; with a 24h interval the job runs daily at this time
    pub daily_time_utc: Option<String>,
    /// Dead departments purged per transaction (default: 100)
    pub batch_size: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            interval_hours: 24,
            daily_time_utc: None,
            batch_size: 100,
        }
    }
}

impl CompactionConfig {
    /// Parsed daily run time, if one is configured
    pub fn daily_time(&self) -> Result<Option<NaiveTime>, ConfigError> {
        self.daily_time_utc
            .as_deref()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| ConfigError::InvalidVar {
                    name: "dailyTimeUtc".to_string(),
                    value: raw.to_string(),
                })
            })
            .transpose()
    }

    /// Time between scheduled runs
    pub fn interval(&self) -> Result<ChronoDuration, ConfigError> {
        i64::try_from(self.interval_hours)
            .ok()
            .and_then(ChronoDuration::try_hours)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "intervalHours {} is out of range",
                    self.interval_hours
                ))
            })
    }

    /// How long a department stays inactive before it is purged
    pub fn retention(&self) -> Result<ChronoDuration, ConfigError> {
        ChronoDuration::try_days(self.retention_days).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "retentionDays {} is out of range",
                self.retention_days
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_days < 0 {
            return Err(ConfigError::Invalid(
                "retentionDays cannot be negative".to_string(),
            ));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid(format!(
                "retentionDays cannot exceed {}",
                MAX_RETENTION_DAYS
            )));
        }
        if self.interval_hours == 0 {
            return Err(ConfigError::Invalid(
                "intervalHours must be greater than 0".to_string(),
            ));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(ConfigError::Invalid(format!(
                "intervalHours cannot exceed {}",
                MAX_INTERVAL_HOURS
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batchSize must be greater than 0".to_string(),
            ));
        }
        self.daily_time()?;
        Ok(())
    }
}

/// Top-level directory settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryConfig {
    /// SQLite database file (default: ./data/directory.db)
    pub database_path: PathBuf,
    /// Maximum wait for one row lock (default: 5000ms)
    pub lock_timeout_ms: u64,
    /// Lifetime of cached listings (default: 300s)
    pub cache_ttl_secs: u64,
    pub compaction: CompactionConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/directory.db"),
            lock_timeout_ms: 5000,
            cache_ttl_secs: 300,
            compaction: CompactionConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidVar {
            name: name.to_string(),
            value,
        })
}

impl DirectoryConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from `DIRECTORY_CONFIG` (if set) and apply `DIRECTORY_*` overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`DirectoryConfig::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(v) = lookup("DIRECTORY_DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("DIRECTORY_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = parse_var("DIRECTORY_LOCK_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("DIRECTORY_CACHE_TTL_SECS") {
            config.cache_ttl_secs = parse_var("DIRECTORY_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("DIRECTORY_RETENTION_DAYS") {
            config.compaction.retention_days = parse_var("DIRECTORY_RETENTION_DAYS", v)?;
        }
        if let Some(v) = lookup("DIRECTORY_INTERVAL_HOURS") {
            config.compaction.interval_hours = parse_var("DIRECTORY_INTERVAL_HOURS", v)?;
        }
        if let Some(v) = lookup("DIRECTORY_DAILY_TIME_UTC") {
            config.compaction.daily_time_utc = Some(v);
        }
        if let Some(v) = lookup("DIRECTORY_BATCH_SIZE") {
            config.compaction.batch_size = parse_var("DIRECTORY_BATCH_SIZE", v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "lockTimeoutMs must be greater than 0".to_string(),
            ));
        }
        self.compaction.validate()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DirectoryConfig::default();
        assert_eq!(config.database_path, PathBuf::from("./data/directory.db"));
        assert_eq!(config.lock_timeout_ms, 5000);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.compaction.retention_days, 30);
        assert_eq!(config.compaction.interval_hours, 24);
        assert_eq!(config.compaction.daily_time_utc, None);
        assert_eq!(config.compaction.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DirectoryConfig::from_json(
            r#"{ "lockTimeoutMs": 250, "compaction": { "dailyTimeUtc": "03:30" } }"#,
        )
        .unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.compaction.retention_days, 30);
        assert_eq!(
            config.compaction.daily_time().unwrap(),
            NaiveTime::from_hms_opt(3, 30, 0)
        );
    }

    #[test]
    fn test_config_validation() {
        let mut config = DirectoryConfig::default();
        config.compaction.daily_time_utc = Some("25:99".to_string());
        assert!(config.validate().is_err());

        let mut config = DirectoryConfig::default();
        config.compaction.interval_hours = 0;
        assert!(config.validate().is_err());

        let mut config = DirectoryConfig::default();
        config.compaction.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let mut config = DirectoryConfig::default();
        config.compaction.interval_hours = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(config.compaction.interval().is_err());

        let mut config = DirectoryConfig::default();
        config.compaction.interval_hours = MAX_INTERVAL_HOURS + 1;
        assert!(config.validate().is_err());

        let mut config = DirectoryConfig::default();
        config.compaction.retention_days = i64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(config.compaction.retention().is_err());

        let mut config = DirectoryConfig::default();
        config.compaction.interval_hours = MAX_INTERVAL_HOURS;
        config.compaction.retention_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());
        assert_eq!(config.compaction.interval().unwrap(), ChronoDuration::hours(8_760));
        assert_eq!(config.compaction.retention().unwrap(), ChronoDuration::days(36_500));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DIRECTORY_DATABASE_PATH", "/tmp/dir.db"),
            ("DIRECTORY_RETENTION_DAYS", "7"),
            ("DIRECTORY_BATCH_SIZE", "10"),
        ]);
        let config =
            DirectoryConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/dir.db"));
        assert_eq!(config.compaction.retention_days, 7);
        assert_eq!(config.compaction.batch_size, 10);

        let bad = HashMap::from([("DIRECTORY_BATCH_SIZE", "many")]);
        let err = DirectoryConfig::from_lookup(|name| bad.get(name).map(|v| v.to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { .. }));
    }
}
