//! Configuration file handling
//!
//! Configuration is organized into two sections:
//! - Connection settings (port, baud rate, read timeout)
//! - Controller settings (firmware, polling, flow control, handshake timeouts)
//!
//! Files are JSON or TOML, chosen by extension, and stored in the
//! platform configuration directory by default.

use crate::error::{ConfigError, SettingsError, SettingsResult};
use gcodestream_communication::{ConnectionParams, ControllerConfig, ControllerType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name used inside the platform configuration directory
pub const CONFIG_FILE_NAME: &str = "gcodestream.toml";

const APP_DIR: &str = "gcodestream";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
    /// Hardware flow control
    pub flow_control: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            timeout_ms: 10,
            flow_control: false,
        }
    }
}

/// Controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Firmware family of the attached controller
    pub firmware: ControllerType,
    /// Status poll interval in milliseconds
    pub status_poll_interval_ms: u64,
    /// Poll for status reports after connecting
    pub status_updates_enabled: bool,
    /// Receive buffer override in bytes
    pub buffer_size: Option<usize>,
    /// Wait for each acknowledgment before sending the next command
    pub single_step_mode: bool,
    /// Handshake status reply timeout in milliseconds
    pub status_timeout_ms: u64,
    /// Handshake command completion timeout in milliseconds
    pub command_timeout_ms: u64,
    /// Skip the reader task and handshake
    pub test_mode: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            firmware: defaults.controller_type,
            status_poll_interval_ms: defaults.status_poll_interval_ms,
            status_updates_enabled: defaults.status_updates_enabled,
            buffer_size: defaults.buffer_size,
            single_step_mode: defaults.single_step_mode,
            status_timeout_ms: defaults.status_timeout_ms,
            command_timeout_ms: defaults.command_timeout_ms,
            test_mode: defaults.test_mode,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Controller settings
    pub controller: ControllerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Self::Toml),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_of_range = |key: &str, value: &dyn ToString| ConfigError::ValueOutOfRange {
            key: key.to_string(),
            value: value.to_string(),
        };

        if self.connection.baud_rate == 0 {
            return Err(out_of_range("connection.baud_rate", &self.connection.baud_rate));
        }
        if self.connection.timeout_ms == 0 {
            return Err(out_of_range("connection.timeout_ms", &self.connection.timeout_ms));
        }

        let controller = &self.controller;
        if controller.status_poll_interval_ms == 0 {
            return Err(out_of_range(
                "controller.status_poll_interval_ms",
                &controller.status_poll_interval_ms,
            ));
        }
        if controller.status_timeout_ms == 0 {
            return Err(out_of_range(
                "controller.status_timeout_ms",
                &controller.status_timeout_ms,
            ));
        }
        if controller.command_timeout_ms == 0 {
            return Err(out_of_range(
                "controller.command_timeout_ms",
                &controller.command_timeout_ms,
            ));
        }
        if let Some(size) = controller.buffer_size {
            // Room for at least one short command and its newline
            if size < 2 {
                return Err(out_of_range("controller.buffer_size", &size));
            }
        }

        Ok(())
    }

    /// Controller configuration for the communication crate
    pub fn controller_config(&self) -> ControllerConfig {
        let c = &self.controller;
        ControllerConfig {
            controller_type: c.firmware,
            buffer_size: c.buffer_size,
            single_step_mode: c.single_step_mode,
            status_poll_interval_ms: c.status_poll_interval_ms,
            status_updates_enabled: c.status_updates_enabled,
            status_timeout_ms: c.status_timeout_ms,
            command_timeout_ms: c.command_timeout_ms,
            test_mode: c.test_mode,
        }
    }

    /// Serial parameters for opening the configured port
    ///
    /// Fails when no port is configured.
    pub fn connection_params(&self) -> Result<ConnectionParams, ConfigError> {
        if self.connection.port.trim().is_empty() {
            return Err(ConfigError::MissingKey("connection.port".to_string()));
        }
        Ok(ConnectionParams {
            flow_control: self.connection.flow_control,
            timeout_ms: self.connection.timeout_ms,
            ..ConnectionParams::serial(self.connection.port.trim(), self.connection.baud_rate)
        })
    }
}
