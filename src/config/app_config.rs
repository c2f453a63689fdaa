//! Application configuration: window tunables, topics, storage and server
//!
//! Each section implements `Default` with the reference values from
//! [`super::defaults`], so an empty or missing config file reproduces the
//! reference behaviour exactly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "WINDOPS_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "windops.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$WINDOPS_CONFIG`
/// 2. `./windops.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Hopping window and aggregation timing
    #[serde(default)]
    pub window: WindowConfig,

    /// Inbound topics and worker channels
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Durable sink location
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP API
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order, apply
    /// `WINDOPS_*` environment overrides, and validate.
    ///
    /// A config file that fails to read or parse is logged and skipped.
    /// An invalid final configuration is returned as an error.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn load_file_or_default() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from WINDOPS_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from WINDOPS_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "WINDOPS_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./windops.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./windops.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./windops.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No windops.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path. Does not apply env overrides.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Apply environment-style overrides from `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key = key, value = %raw, "Ignoring unparseable config override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "WINDOPS_WINDOW_SIZE_SECS") {
            self.window.size_secs = v;
        }
        if let Some(v) = parsed(&lookup, "WINDOPS_WINDOW_STEP_SECS") {
            self.window.step_secs = v;
        }
        if let Some(v) = parsed(&lookup, "WINDOPS_RETENTION_MULTIPLIER") {
            self.window.retention_multiplier = v;
        }
        if let Some(v) = parsed(&lookup, "WINDOPS_TICK_INTERVAL_SECS") {
            self.window.tick_interval_secs = v;
        }
        if let Some(v) = lookup("WINDOPS_DATA_DIR") {
            self.storage.data_dir = v;
        }
        if let Some(v) = lookup("WINDOPS_SERVER_ADDR") {
            self.server.addr = v;
        }
    }

    /// Validate all sections, collecting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let w = &self.window;

        if w.size_secs == 0 {
            errors.push("window.size_secs must be > 0".to_string());
        }
        if w.step_secs == 0 {
            errors.push("window.step_secs must be > 0".to_string());
        }
        if w.step_secs > w.size_secs {
            errors.push(format!(
                "window.step_secs ({}) must be <= window.size_secs ({})",
                w.step_secs, w.size_secs
            ));
        }
        if !w.retention_multiplier.is_finite()
            || w.retention_multiplier < defaults::MIN_RETENTION_MULTIPLIER
        {
            errors.push(format!(
                "window.retention_multiplier ({}) must be >= {}",
                w.retention_multiplier,
                defaults::MIN_RETENTION_MULTIPLIER
            ));
        }
        if w.tick_interval_secs == 0 {
            errors.push("window.tick_interval_secs must be > 0".to_string());
        }
        for (name, secs) in [
            ("size_secs", w.size_secs),
            ("step_secs", w.step_secs),
            ("tick_interval_secs", w.tick_interval_secs),
        ] {
            if secs > defaults::MAX_WINDOW_SECS {
                errors.push(format!(
                    "window.{name} ({secs}) must be <= {}",
                    defaults::MAX_WINDOW_SECS
                ));
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let (retention_secs, max_retention_secs) = (
            w.size_secs as f64 * w.retention_multiplier,
            defaults::MAX_RETENTION_SECS as f64,
        );
        if retention_secs.is_finite() && retention_secs > max_retention_secs {
            errors.push(format!(
                "window retention ({retention_secs}s) must be <= {}s",
                defaults::MAX_RETENTION_SECS
            ));
        }

        let t = &self.ingest.topics;
        for (name, topic) in [
            ("telemetry", &t.telemetry),
            ("curtailment", &t.curtailment),
            ("cancellation", &t.cancellation),
        ] {
            if topic.trim().is_empty() {
                errors.push(format!("ingest.topics.{name} must not be empty"));
            }
        }
        if t.telemetry == t.curtailment
            || t.telemetry == t.cancellation
            || t.curtailment == t.cancellation
        {
            errors.push("ingest.topics must be distinct".to_string());
        }
        if self.ingest.channel_capacity == 0 {
            errors.push("ingest.channel_capacity must be > 0".to_string());
        }

        if self.storage.data_dir.trim().is_empty() {
            errors.push("storage.data_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({path}): {err}", path = .0.display(), err = .1)]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({path}): {err}", path = .0.display(), err = .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Window
// ============================================================================

/// Hopping window and aggregation timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window size (seconds)
    #[serde(default = "default_size_secs")]
    pub size_secs: u64,

    /// Window step (seconds); also the ramp-rate denominator
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,

    /// Samples older than `size_secs × retention_multiplier` are evicted
    #[serde(default = "default_retention_multiplier")]
    pub retention_multiplier: f64,

    /// How often the aggregator runs (seconds)
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

const fn default_size_secs() -> u64 {
    defaults::WINDOW_SIZE_SECS
}
const fn default_step_secs() -> u64 {
    defaults::WINDOW_STEP_SECS
}
const fn default_retention_multiplier() -> f64 {
    defaults::RETENTION_MULTIPLIER
}
const fn default_tick_interval_secs() -> u64 {
    defaults::TICK_INTERVAL_SECS
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size_secs: default_size_secs(),
            step_secs: default_step_secs(),
            retention_multiplier: default_retention_multiplier(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

// ============================================================================
// Ingest
// ============================================================================

/// Where a telemetry sample's `observed_at` comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    /// Stamp with the time the dispatcher received the record
    #[default]
    Arrival,
    /// Use the record's own `timestamp` field (required)
    Event,
}

/// Inbound topics and worker channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub topics: TopicConfig,

    #[serde(default)]
    pub timestamp_source: TimestampSource,

    /// Bounded capacity of each worker channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_channel_capacity() -> usize {
    defaults::CHANNEL_CAPACITY
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topics: TopicConfig::default(),
            timestamp_source: TimestampSource::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Logical topic names for the three inbound streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_telemetry_topic")]
    pub telemetry: String,
    #[serde(default = "default_curtailment_topic")]
    pub curtailment: String,
    #[serde(default = "default_cancellation_topic")]
    pub cancellation: String,
}

fn default_telemetry_topic() -> String {
    defaults::TELEMETRY_TOPIC.to_string()
}
fn default_curtailment_topic() -> String {
    defaults::CURTAILMENT_TOPIC.to_string()
}
fn default_cancellation_topic() -> String {
    defaults::CANCELLATION_TOPIC.to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_topic(),
            curtailment: default_curtailment_topic(),
            cancellation: default_cancellation_topic(),
        }
    }
}

// ============================================================================
// Storage / Server
// ============================================================================

/// Durable sink location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled database directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    defaults::DATA_DIR.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    #[serde(default = "default_server_addr")]
    pub addr: String,
}

const fn default_server_enabled() -> bool {
    true
}
fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            addr: default_server_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_gives_reference_defaults() {
        let config: AppConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.window.size_secs, 600);
        assert_eq!(config.window.step_secs, 120);
        assert_eq!(config.window.retention_multiplier, 1.5);
        assert_eq!(config.window.tick_interval_secs, 120);
        assert_eq!(config.ingest.topics.telemetry, "turbine_telemetry");
        assert_eq!(config.ingest.timestamp_source, TimestampSource::Arrival);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let toml_str = r#"
            [window]
            size_secs = 300
            step_secs = 60

            [ingest]
            timestamp_source = "event"
        "#;
        let config: AppConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.window.size_secs, 300);
        assert_eq!(config.window.step_secs, 60);
        assert_eq!(config.window.retention_multiplier, 1.5);
        assert_eq!(config.ingest.timestamp_source, TimestampSource::Event);
        assert_eq!(config.ingest.channel_capacity, 1_024);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.window.step_secs = 900;
        config.window.retention_multiplier = 1.0;
        config.ingest.topics.cancellation = config.ingest.topics.curtailment.clone();

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 3, "unexpected errors: {errors:?}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_out_of_range_durations() {
        let mut config = AppConfig::default();
        config.window.size_secs = 100_000_000_000_000;
        config.window.tick_interval_secs = u64::MAX;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.starts_with("window.size_secs")), "{errors:?}");
                assert!(errors.iter().any(|e| e.starts_with("window.tick_interval_secs")), "{errors:?}");
                assert!(errors.iter().any(|e| e.starts_with("window retention")), "{errors:?}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut config = AppConfig::default();
        config.window.retention_multiplier = 1e12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WINDOPS_WINDOW_SIZE_SECS", "1200"),
            ("WINDOPS_WINDOW_STEP_SECS", "300"),
            ("WINDOPS_RETENTION_MULTIPLIER", "2.0"),
            ("WINDOPS_TICK_INTERVAL_SECS", "not-a-number"),
            ("WINDOPS_SERVER_ADDR", "127.0.0.1:9000"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.window.size_secs, 1200);
        assert_eq!(config.window.step_secs, 300);
        assert_eq!(config.window.retention_multiplier, 2.0);
        assert_eq!(config.window.tick_interval_secs, 120);
        assert_eq!(config.server.addr, "127.0.0.1:9000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("windops.toml");
        std::fs::write(&path, "[window]\nsize_secs = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.window.size_secs, config.window.size_secs);
        assert_eq!(parsed.server.addr, config.server.addr);
    }
}
