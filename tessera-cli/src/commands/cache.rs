//! Disk tile store CLI commands.

use clap::Subcommand;
use tessera::cache::{clear_disk_store, disk_store_stats, DiskStoreStats};
use tessera::config::{format_size, ConfigFile};

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove every tile from the disk store
    Clear,
    /// Show disk store statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let dir = &config.cache.disk_directory;

    match action {
        CacheAction::Clear => {
            println!("Clearing disk tile store at: {}", dir.display());
            let removed = clear_disk_store(dir)?;
            println!(
                "Deleted {} files, freed {}",
                removed.files,
                format_size(removed.bytes as usize)
            );
        }
        CacheAction::Stats => {
            println!("Disk tile store: {}", dir.display());
            if !config.cache.disk_enabled {
                println!("  (disabled in [cache])");
            }
            for line in stats_lines(&disk_store_stats(dir)?) {
                println!("  {}", line);
            }
        }
    }
    Ok(())
}

fn stats_lines(stats: &DiskStoreStats) -> [String; 2] {
    [
        format!("Files: {}", stats.files),
        format!("Size:  {}", format_size(stats.bytes as usize)),
    ]
}
