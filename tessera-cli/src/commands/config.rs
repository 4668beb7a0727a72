//! Configuration management CLI commands.
//!
//! Provides `config get`, `config set`, `config list`, `config path` and
//! `config init` for viewing and modifying `~/.tessera/config.ini`.

use clap::Subcommand;
use tessera::config::{config_file_path, ConfigFile};

use super::common::split_config_key;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., view.zoom, layer.osm.url)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., view.zoom, layer.osm.url)
        key: String,

        /// Value to set
        value: String,
    },

    /// Print the effective configuration
    List,

    /// Show the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => run_get(&key),
        ConfigCommands::Set { key, value } => run_set(&key, &value),
        ConfigCommands::List => run_list(),
        ConfigCommands::Path => run_path(),
        ConfigCommands::Init { force } => run_init(force),
    }
}

fn run_get(key: &str) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    println!("{}", lookup(&config, key)?);
    Ok(())
}

fn run_set(key: &str, value: &str) -> Result<(), CliError> {
    let mut config = ConfigFile::load()?;
    apply(&mut config, key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn run_list() -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    print!("{}", config.to_ini_string());
    Ok(())
}

fn run_path() -> Result<(), CliError> {
    println!("{}", config_file_path().display());
    Ok(())
}

fn run_init(force: bool) -> Result<(), CliError> {
    let path = config_file_path();
    if force {
        ConfigFile::default().save_to(&path)?;
        println!("Wrote default configuration to {}", path.display());
    } else if ConfigFile::ensure_exists(&path)? {
        println!("Created {}", path.display());
    } else {
        println!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Ok(())
}

fn lookup(config: &ConfigFile, key: &str) -> Result<String, CliError> {
    let (section, name) = split_config_key(key)?;
    config.get_value(section, name).ok_or_else(|| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'tessera config list' to see available keys.",
            key
        ))
    })
}

fn apply(config: &mut ConfigFile, key: &str, value: &str) -> Result<(), CliError> {
    let (section, name) = split_config_key(key)?;
    config.set_value(section, name, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown_keys() {
        let config = ConfigFile::default();
        assert_eq!(lookup(&config, "view.zoom").unwrap(), "3");
        assert!(lookup(&config, "view.tilt").is_err());
        assert!(lookup(&config, "zoom").is_err());
    }

    #[test]
    fn test_apply_validates_value() {
        let mut config = ConfigFile::default();
        apply(&mut config, "view.zoom", "12").unwrap();
        assert_eq!(config.view.zoom, 12);

        let err = apply(&mut config, "view.zoom", "40").unwrap_err();
        assert!(matches!(err, CliError::ConfigFile(_)));
        assert_eq!(config.view.zoom, 12);
    }

    #[test]
    fn test_apply_to_layer_section() {
        let mut config = ConfigFile::default();
        apply(&mut config, "layer.osm.max_zoom", "17").unwrap();
        assert_eq!(config.layer("osm").unwrap().max_zoom, 17);
    }
}
