//! gcodestream Settings
//!
//! Loads, validates and saves the configuration file and maps it onto the
//! communication crate's connection and controller settings.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{Config, ConnectionSettings, ControllerSettings, CONFIG_FILE_NAME};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
pub use persistence::SettingsPersistence;
