//! TOML-based driver configuration.
//!
//! Every field has a default so an empty file (or no file) is a valid
//! configuration. Unknown keys are ignored.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DriverError;

/// Top-level driver configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriverConfig {
    /// Keep cached values whose CC the node no longer advertises.
    #[serde(default)]
    pub preserve_unknown_values: bool,
    /// Never update `currentValue` before the node confirms it.
    #[serde(default)]
    pub disable_optimistic_value_update: bool,
    #[serde(default)]
    pub attempts: AttemptsSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl DriverConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, DriverError> {
        toml::from_str(s).map_err(|e| DriverError::Config(format!("failed to parse config: {e}")))
    }
}

/// The `[attempts]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AttemptsSection {
    /// Frame-level attempts against the controller.
    #[serde(default = "default_controller_attempts")]
    pub controller: u8,
    /// SendData attempts against a node.
    #[serde(default = "default_send_data_attempts")]
    pub send_data: u8,
}

fn default_controller_attempts() -> u8 {
    3
}

fn default_send_data_attempts() -> u8 {
    3
}

impl Default for AttemptsSection {
    fn default() -> Self {
        Self {
            controller: default_controller_attempts(),
            send_data: default_send_data_attempts(),
        }
    }
}

/// The `[timeouts]` section, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_ack_ms")]
    pub ack: u64,
    #[serde(default = "default_response_ms")]
    pub response: u64,
    #[serde(default = "default_send_data_callback_ms")]
    pub send_data_callback: u64,
    #[serde(default = "default_nonce_ms")]
    pub nonce: u64,
    /// Inter-frame receive timeout for a partial data frame.
    #[serde(default = "default_frame_ms")]
    pub frame: u64,
    /// Per-exchange budget during a node interview.
    #[serde(default = "default_exchange_ms")]
    pub exchange: u64,
}

fn default_ack_ms() -> u64 {
    1600
}

fn default_response_ms() -> u64 {
    10_000
}

fn default_send_data_callback_ms() -> u64 {
    65_000
}

fn default_nonce_ms() -> u64 {
    10_000
}

fn default_frame_ms() -> u64 {
    1500
}

fn default_exchange_ms() -> u64 {
    30_000
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            ack: default_ack_ms(),
            response: default_response_ms(),
            send_data_callback: default_send_data_callback_ms(),
            nonce: default_nonce_ms(),
            frame: default_frame_ms(),
            exchange: default_exchange_ms(),
        }
    }
}

impl TimeoutsSection {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response)
    }

    pub fn send_data_callback_timeout(&self) -> Duration {
        Duration::from_millis(self.send_data_callback)
    }

    pub fn nonce_timeout(&self) -> Duration {
        Duration::from_millis(self.nonce)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange)
    }
}

/// The `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    /// Cache directory. Defaults to `~/.zwave/cache`.
    pub cache_dir: Option<String>,
}

fn default_storage_enabled() -> bool {
    true
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            cache_dir: None,
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_defaults() {
        let config = DriverConfig::parse("").unwrap();
        assert_eq!(config.attempts.controller, 3);
        assert_eq!(config.attempts.send_data, 3);
        assert_eq!(config.timeouts.ack, 1600);
        assert_eq!(config.timeouts.response, 10_000);
        assert_eq!(config.timeouts.send_data_callback, 65_000);
        assert_eq!(config.timeouts.frame, 1500);
        assert!(config.storage.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(!config.preserve_unknown_values);
        assert!(!config.disable_optimistic_value_update);
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
preserve_unknown_values = true
disable_optimistic_value_update = true

[attempts]
controller = 5
send_data = 2

[timeouts]
ack = 1000
response = 5000
send_data_callback = 30000

[storage]
enabled = false
cache_dir = "/tmp/zwave-test"

[logging]
level = "trace"
"#;
        let config = DriverConfig::parse(toml).unwrap();
        assert!(config.preserve_unknown_values);
        assert!(config.disable_optimistic_value_update);
        assert_eq!(config.attempts.controller, 5);
        assert_eq!(config.timeouts.ack_timeout(), Duration::from_millis(1000));
        assert_eq!(config.timeouts.response_timeout(), Duration::from_secs(5));
        // Unset keys keep their defaults.
        assert_eq!(config.timeouts.frame, 1500);
        assert!(!config.storage.enabled);
        assert_eq!(config.storage.cache_dir.as_deref(), Some("/tmp/zwave-test"));
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn unknown_options_are_ignored() {
        let toml = r#"
some_future_flag = true

[timeouts]
ack = 1200
does_not_exist = 9
"#;
        let config = DriverConfig::parse(toml).unwrap();
        assert_eq!(config.timeouts.ack, 1200);
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(DriverConfig::parse("[attempts").is_err());
        assert!(DriverConfig::parse("[attempts]\ncontroller = \"three\"").is_err());
    }
}
