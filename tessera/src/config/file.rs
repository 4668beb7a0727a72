//! Configuration file handling for `~/.tessera/config.ini`.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::parser::parse_ini;
use super::settings::ConfigFile;
use super::writer::to_config_string;

/// Name of the per-user config directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".tessera";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

impl ConfigFile {
    /// Load from `~/.tessera/config.ini`.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Parse INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(text).map_err(ini::Error::Parse)?;
        parse_ini(&ini)
    }

    pub fn to_ini_string(&self) -> String {
        to_config_string(self)
    }

    /// Save to `~/.tessera/config.ini`.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }
        std::fs::write(path, to_config_string(self))
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Write the defaults to `path` unless a file is already there.
    ///
    /// Returns true when a file was created.
    pub fn ensure_exists(path: &Path) -> Result<bool, ConfigFileError> {
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to(path)?;
        Ok(true)
    }

    /// Current value of `section.key` as it would be written to the file.
    pub fn get_value(&self, section: &str, key: &str) -> Option<String> {
        let ini = Ini::load_from_str(&to_config_string(self)).ok()?;
        ini.get_from(Some(section), key).map(str::to_string)
    }

    /// Set `section.key` to `value`, validating it like a loaded file would.
    ///
    /// On error `self` is left unchanged.
    pub fn set_value(
        &mut self,
        section: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigFileError> {
        let mut ini = Ini::load_from_str(&to_config_string(self)).map_err(ini::Error::Parse)?;
        ini.with_section(Some(section)).set(key, value);
        *self = parse_ini(&ini)?;
        Ok(())
    }
}

/// `~/.tessera`, or `./.tessera` when there is no home directory.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// `~/.tessera/config.ini`
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
