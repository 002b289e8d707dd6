//! Settings Persistence
//!
//! Ties a [`Config`] to the file it came from so it can be edited and
//! written back.

use crate::config::Config;
use crate::error::SettingsResult;
use std::path::{Path, PathBuf};

/// Configuration bound to a file path
#[derive(Debug, Clone)]
pub struct SettingsPersistence {
    path: PathBuf,
    config: Config,
}

impl SettingsPersistence {
    /// Load `path`, falling back to defaults when the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> SettingsResult<Self> {
        let path = path.into();
        let config = if path.exists() {
            Config::load_from_file(&path)?
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Config::default()
        };
        Ok(Self { path, config })
    }

    /// Open the file in the platform configuration directory
    pub fn open_default() -> SettingsResult<Self> {
        Self::open(Config::default_path()?)
    }

    /// Write the current configuration back to its file
    pub fn save(&self) -> SettingsResult<()> {
        self.config.save_to_file(&self.path)
    }

    /// Re-read the file, discarding unsaved changes
    pub fn reload(&mut self) -> SettingsResult<()> {
        self.config = Config::load_from_file(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodestream_communication::ControllerType;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = SettingsPersistence::open(dir.path().join("gcodestream.toml")).unwrap();
        assert_eq!(settings.config(), &Config::default());
        assert!(!settings.path().exists());
    }

    #[test]
    fn test_edit_save_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gcodestream.toml");

        let mut settings = SettingsPersistence::open(&path).unwrap();
        settings.config_mut().controller.firmware = ControllerType::Smoothie;
        settings.config_mut().connection.port = "COM3".to_string();
        settings.save().unwrap();

        let reopened = SettingsPersistence::open(&path).unwrap();
        assert_eq!(reopened.config().controller.firmware, ControllerType::Smoothie);
        assert_eq!(reopened.config().connection.port, "COM3");

        settings.config_mut().connection.port = "COM9".to_string();
        settings.reload().unwrap();
        assert_eq!(settings.config().connection.port, "COM3");
    }

    #[test]
    fn test_invalid_edit_not_saved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gcodestream.json");

        let mut settings = SettingsPersistence::open(&path).unwrap();
        settings.config_mut().connection.baud_rate = 0;
        assert!(settings.save().is_err());
        assert!(!path.exists());
    }
}
