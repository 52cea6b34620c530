//! Configuration Module
//!
//! Handles configuration loading from YAML files, environment variables,
//! and command-line arguments. Every component receives its settings as an
//! explicit value from this module rather than reading ambient process
//! state, so tests can construct deterministic configurations directly.

use crate::{ManagerError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Custom deserializer for Duration from string format like "30s", "5m", "1h"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty duration string".to_string());
        }

        let mut num_end = 0;
        for (i, c) in s.chars().enumerate() {
            if c.is_ascii_digit() || c == '.' {
                num_end = i + 1;
            } else {
                break;
            }
        }

        if num_end == 0 {
            return Err(format!("No number found in duration string: {}", s));
        }

        let value: f64 = s[..num_end]
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", &s[..num_end], e))?;

        let duration = match s[num_end..].trim() {
            "s" | "sec" | "secs" | "second" | "seconds" | "" => Duration::from_secs_f64(value),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs_f64(value * 60.0),
            "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs_f64(value * 3600.0),
            "ms" | "millis" | "millisecond" | "milliseconds" => {
                Duration::from_secs_f64(value / 1000.0)
            }
            unit => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(duration)
    }
}

/// Storage tier paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Fast-tier root (active and recently finished items)
    pub fast_root: PathBuf,
    /// Slow-tier root (permanent archive copies, label subdirectories)
    pub slow_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            fast_root: PathBuf::from("/downloading"),
            slow_root: PathBuf::from("/downloads/archive"),
        }
    }
}

/// Free-space management settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    /// Free-space threshold on the fast tier (bytes); a sweep frees space
    /// until the projected free space reaches this value
    pub free_space_threshold: u64,
    /// Safety margin added to an item's declared size when checking the
    /// destination before a copy (bytes)
    pub safety_margin: u64,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            free_space_threshold: 700 * 1024 * 1024 * 1024,
            safety_margin: 1024 * 1024 * 1024,
        }
    }
}

/// Copy-verify-relocate engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of copy+verify attempts before giving up (1 = no retries)
    pub copy_retry_attempts: u32,
    /// Verify file count and byte totals after each copy
    pub verification_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            copy_retry_attempts: 3,
            verification_enabled: true,
        }
    }
}

/// Process dispatcher and durable state settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of concurrently running worker processes
    pub max_workers: usize,
    /// Directory holding one durable record per queued request
    pub queue_dir: PathBuf,
    /// Directory holding one record per live worker process
    pub workers_dir: PathBuf,
    /// Directory holding one lock record per operation kind
    pub locks_dir: PathBuf,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            queue_dir: PathBuf::from("/var/lib/tiermover/queue"),
            workers_dir: PathBuf::from("/var/lib/tiermover/workers"),
            locks_dir: PathBuf::from("/var/lib/tiermover/locks"),
        }
    }
}

/// Item metadata source (remote system of record) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Base URL of the metadata API
    pub base_url: String,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A downstream media-management service to notify after a migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyService {
    /// Service name used in logs (e.g. "sonarr")
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    /// Category label routed to this service (matched case-insensitively)
    pub tag: String,
}

/// Notification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub enabled: bool,
    #[serde(default)]
    pub services: Vec<NotifyService>,
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            services: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (overridable with RUST_LOG)
    pub log_level: String,
    /// Optional directory for daily-rotated application log files;
    /// console-only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub space: SpaceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an optional YAML file, then apply
    /// environment-variable overrides and validate.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ManagerError::ConfigError(format!("Failed to read config file {}: {}", path, e))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            ManagerError::ConfigError(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Override configuration values from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(fast_root) = std::env::var("FAST_TIER_ROOT") {
            self.storage.fast_root = PathBuf::from(fast_root);
        }
        if let Ok(slow_root) = std::env::var("SLOW_TIER_ROOT") {
            self.storage.slow_root = PathBuf::from(slow_root);
        }
        if let Ok(threshold) = std::env::var("FREE_SPACE_THRESHOLD") {
            if let Ok(bytes) = threshold.parse() {
                self.space.free_space_threshold = bytes;
            }
        }
        if let Ok(margin) = std::env::var("SAFETY_MARGIN") {
            if let Ok(bytes) = margin.parse() {
                self.space.safety_margin = bytes;
            }
        }
        if let Ok(attempts) = std::env::var("COPY_RETRY_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.engine.copy_retry_attempts = n;
            }
        }
        if let Ok(max_workers) = std::env::var("MAX_WORKERS") {
            if let Ok(n) = max_workers.parse() {
                self.dispatcher.max_workers = n;
            }
        }
        if let Ok(state_dir) = std::env::var("STATE_DIR") {
            let base = PathBuf::from(state_dir);
            self.dispatcher.queue_dir = base.join("queue");
            self.dispatcher.workers_dir = base.join("workers");
            self.dispatcher.locks_dir = base.join("locks");
        }
        if let Ok(base_url) = std::env::var("METADATA_URL") {
            self.metadata.base_url = base_url;
        }
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            self.logging.log_level = log_level;
        }
        if let Ok(log_dir) = std::env::var("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(log_dir));
        }
    }

    /// Validate the configuration, rejecting values that would make the
    /// manager misbehave silently
    pub fn validate(&self) -> Result<()> {
        if self.engine.copy_retry_attempts == 0 {
            return Err(ManagerError::ConfigError(
                "copy_retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.dispatcher.max_workers == 0 {
            return Err(ManagerError::ConfigError(
                "max_workers must be at least 1".to_string(),
            ));
        }

        if self.storage.fast_root == self.storage.slow_root {
            return Err(ManagerError::ConfigError(
                "fast_root and slow_root must be different paths".to_string(),
            ));
        }

        if !self.metadata.base_url.starts_with("http://")
            && !self.metadata.base_url.starts_with("https://")
        {
            return Err(ManagerError::ConfigError(format!(
                "metadata base_url must be an http(s) URL, got '{}'",
                self.metadata.base_url
            )));
        }

        if self.notify.enabled {
            for service in &self.notify.services {
                if service.base_url.is_empty() || service.api_key.is_empty() {
                    return Err(ManagerError::ConfigError(format!(
                        "notify service '{}' is missing base_url or api_key",
                        service.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Log the effective configuration at startup
    pub fn log_summary(&self) {
        info!(
            "Storage tiers: fast={}, slow={}",
            self.storage.fast_root.display(),
            self.storage.slow_root.display()
        );
        info!(
            "Space management: threshold={}MB, safety_margin={}MB",
            self.space.free_space_threshold / 1024 / 1024,
            self.space.safety_margin / 1024 / 1024
        );
        info!(
            "Engine: copy_retry_attempts={}, verification_enabled={}",
            self.engine.copy_retry_attempts, self.engine.verification_enabled
        );
        info!(
            "Dispatcher: max_workers={}, queue_dir={}, workers_dir={}",
            self.dispatcher.max_workers,
            self.dispatcher.queue_dir.display(),
            self.dispatcher.workers_dir.display()
        );
        if self.notify.enabled {
            let tags: Vec<&str> = self.notify.services.iter().map(|s| s.tag.as_str()).collect();
            info!("Notifications: enabled, tags={:?}", tags);
        } else {
            info!("Notifications: disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = Config::default();
        config.engine.copy_retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.dispatcher.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_tier_roots_rejected() {
        let mut config = Config::default();
        config.storage.slow_root = config.storage.fast_root.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_notify_service_requires_api_key() {
        let mut config = Config::default();
        config.notify.enabled = true;
        config.notify.services.push(NotifyService {
            name: "sonarr".to_string(),
            base_url: "http://localhost:8989".to_string(),
            api_key: String::new(),
            tag: "sonarr".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(
            duration_serde::parse_duration("30s").unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(
            duration_serde::parse_duration("5m").unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            duration_serde::parse_duration("2h").unwrap(),
            Duration::from_secs(7200)
        );
        assert_eq!(
            duration_serde::parse_duration("500ms").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(
            duration_serde::parse_duration("45").unwrap(),
            Duration::from_secs(45)
        );
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(duration_serde::parse_duration("").is_err());
        assert!(duration_serde::parse_duration("fast").is_err());
        assert!(duration_serde::parse_duration("10 fortnights").is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            parsed.space.free_space_threshold,
            config.space.free_space_threshold
        );
        assert_eq!(parsed.metadata.timeout, config.metadata.timeout);
    }
}
