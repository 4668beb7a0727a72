//! Shared setup for commands that drive the engine: config and logging.

use tracing::info;

use tessera::config::ConfigFile;
use tessera::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};

use crate::error::CliError;

/// Keeps logging alive for the duration of a command.
pub struct CliRunner {
    _logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load the config file and start logging to `~/.tessera/logs`.
    pub fn new() -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let logging_guard = init_logging(&default_log_dir(), default_log_file())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;
        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command, "Tessera starting"
        );
    }
}
