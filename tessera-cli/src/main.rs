//! Tessera CLI - Command-line interface
//!
//! Renders map views headlessly and manages the configuration file and the
//! on-disk tile store of the tessera library.

mod commands;
mod error;
mod runner;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::render::RenderArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about = "Render slippy-map tiles headlessly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a view to a PNG or summarize its vector display list
    Render(RenderArgs),

    /// View or change settings in ~/.tessera/config.ini
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect or clear the on-disk tile store
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        e.exit();
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Config { command } => commands::config::run(command),
        Commands::Cache { action } => commands::cache::run(action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_render_flags_parse() {
        let cli = Cli::try_parse_from([
            "tessera",
            "render",
            "--lat",
            "-33.9",
            "--lon",
            "151.2",
            "--zoom",
            "10",
            "--layers",
            "osm,roads",
            "--marker",
            "-33.86,151.21",
            "--backend",
            "vector",
        ])
        .unwrap();
        let Commands::Render(args) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(args.lat, Some(-33.9));
        assert_eq!(args.zoom, Some(10));
        assert_eq!(args.layers, vec!["osm", "roads"]);
        assert_eq!(args.markers.len(), 1);
        assert_eq!(args.backend, commands::common::BackendKind::Vector);
        assert_eq!(args.output.to_str(), Some("map.png"));
    }

    #[test]
    fn test_config_set_parses() {
        let cli = Cli::try_parse_from(["tessera", "config", "set", "view.zoom", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Set { .. }
            }
        ));
    }
}
