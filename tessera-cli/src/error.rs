//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use tessera::cache::DiskStoreError;
use tessera::config::ConfigFileError;
use tessera::drawer::DrawerError;
use tessera::provider::ProviderError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Config file could not be read, parsed or written
    ConfigFile(ConfigFileError),
    /// Invalid argument or setting
    Config(String),
    /// Failed to start the async runtime or HTTP client
    Startup(String),
    /// Render backend failure
    Render(DrawerError),
    /// Disk tile store failure
    Cache(DiskStoreError),
    /// Failed to write an output file
    FileWrite { path: String, error: String },
}

impl CliError {
    /// Print the error with any hints and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::ConfigFile(ConfigFileError::InvalidValue { section, key, .. }) => {
                eprintln!();
                eprintln!("Fix the value in the config file, or reset it with:");
                eprintln!("  tessera config set {}.{} <value>", section, key);
                eprintln!("The file lives at: tessera config path");
            }
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Run 'tessera config list' to see the configured layers and defaults.");
            }
            CliError::Startup(_) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. The system TLS roots could not be loaded");
                eprintln!("  2. Too many threads for the current resource limits");
            }
            CliError::Cache(_) => {
                eprintln!();
                eprintln!("Check that the disk_directory in [cache] exists and is writable.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Startup(msg) => write!(f, "Failed to start: {}", msg),
            CliError::Render(e) => write!(f, "Render failed: {}", e),
            CliError::Cache(e) => write!(f, "Disk tile store error: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Render(e) => Some(e),
            CliError::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<DrawerError> for CliError {
    fn from(e: DrawerError) -> Self {
        CliError::Render(e)
    }
}

impl From<DiskStoreError> for CliError {
    fn from(e: DiskStoreError) -> Self {
        CliError::Cache(e)
    }
}

impl From<ProviderError> for CliError {
    fn from(e: ProviderError) -> Self {
        CliError::Startup(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_message_names_key() {
        let err = CliError::from(ConfigFileError::InvalidValue {
            section: "view".to_string(),
            key: "zoom".to_string(),
            value: "99".to_string(),
            reason: "must be a zoom level between 0 and 23".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Invalid configuration: view.zoom = '99' - must be a zoom level between 0 and 23"
        );
    }

    #[test]
    fn test_render_error_has_source() {
        let err = CliError::from(DrawerError::Disposed);
        assert!(std::error::Error::source(&err).is_some());
    }
}
