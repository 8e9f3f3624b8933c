//! Configuration file management.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pitmaster_core::{OrchestratorConfig, PairingOptions, ReconnectOptions};
use serde::{Deserialize, Serialize};

/// Minimum poll interval in seconds.
pub const MIN_POLL_INTERVAL: u64 = 1;
/// Maximum poll interval in seconds (1 hour).
pub const MAX_POLL_INTERVAL: u64 = 3600;
/// Maximum first reconnect delay in milliseconds.
pub const MAX_INITIAL_DELAY_MS: u64 = 60_000;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub polling: PollingConfig,
    pub pairing: PairingConfig,
    pub reconnect: ReconnectConfig,
    /// Friendly names for device ids.
    pub devices: Vec<DeviceAlias>,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.storage.validate());
        errors.extend(self.polling.validate());
        errors.extend(self.pairing.validate());
        errors.extend(self.reconnect.validate());

        let mut seen = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("devices[{}]", i);
            errors.extend(device.validate(&prefix));

            if !seen.insert(device.alias.to_lowercase()) {
                errors.push(ValidationError {
                    field: format!("{}.alias", prefix),
                    message: format!("duplicate alias '{}'", device.alias),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an alias to its device id, or return the input unchanged.
    pub fn resolve_device(&self, device: &str) -> String {
        self.devices
            .iter()
            .find(|d| d.alias.eq_ignore_ascii_case(device))
            .map(|d| d.id.clone())
            .unwrap_or_else(|| device.to_string())
    }

    /// Alias configured for a device id, if any.
    pub fn alias_for(&self, device_id: &str) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.alias.as_str())
    }

    /// Library configuration derived from this file.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .poll_interval(Duration::from_secs(self.polling.interval_secs))
            .pairing(
                PairingOptions::default()
                    .scan_timeout(Duration::from_secs(self.pairing.scan_timeout_secs)),
            )
            .reconnect(
                ReconnectOptions::default()
                    .max_attempts(self.reconnect.max_attempts)
                    .initial_delay(Duration::from_millis(self.reconnect.initial_delay_ms)),
            )
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: pitmaster_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between status fetches.
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.interval_secs < MIN_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "polling.interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too short (minimum {} second)",
                    self.interval_secs, MIN_POLL_INTERVAL
                ),
            });
        } else if self.interval_secs > MAX_POLL_INTERVAL {
            errors.push(ValidationError {
                field: "polling.interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too long (maximum {} seconds / 1 hour)",
                    self.interval_secs, MAX_POLL_INTERVAL
                ),
            });
        }
        errors
    }
}

/// Bluetooth pairing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Default scan duration in seconds.
    pub scan_timeout_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
        }
    }
}

impl PairingConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.scan_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "pairing.scan_timeout_secs".to_string(),
                message: "scan timeout must be at least 1 second".to_string(),
            });
        }
        errors
    }
}

/// Reconnection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts per reconnection episode.
    pub max_attempts: u32,
    /// Delay before the first attempt, in milliseconds. Doubles per attempt.
    pub initial_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.max_attempts == 0 {
            errors.push(ValidationError {
                field: "reconnect.max_attempts".to_string(),
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.initial_delay_ms == 0 || self.initial_delay_ms > MAX_INITIAL_DELAY_MS {
            errors.push(ValidationError {
                field: "reconnect.initial_delay_ms".to_string(),
                message: format!(
                    "initial delay {} ms is outside 1-{} ms",
                    self.initial_delay_ms, MAX_INITIAL_DELAY_MS
                ),
            });
        }
        errors
    }
}

/// A friendly name for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAlias {
    /// Name used on the command line (e.g., "backyard").
    pub alias: String,
    /// Device id as reported by `scan`.
    pub id: String,
}

impl DeviceAlias {
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.alias.trim().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.alias", prefix),
                message: "alias cannot be empty".to_string(),
            });
        }
        if self.id.trim().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.id", prefix),
                message: "device id cannot be empty".to_string(),
            });
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `polling.interval_secs` or `devices[0].alias`).
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pitmaster")
        .join("config.toml")
}
