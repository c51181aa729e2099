//! statecache - operator tooling for a snapshot cache root
//!
//! Subcommands:
//! - `statecache status` - Show what is on disk under the cache root
//! - `statecache inspect` - Restore the snapshot and summarize its contents
//! - `statecache purge` - Delete every piece of cache state

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use statecache::CacheConfig;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "statecache")]
#[command(about = "Inspect and purge statecache snapshot directories")]
#[command(version)]
struct Cli {
    /// Cache root holding the snapshot (default: ./.cache)
    #[arg(long, global = true, env = "STATECACHE_ROOT")]
    cache_root: Option<PathBuf>,

    /// TOML config file with a [cache] section
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show snapshot, backup, legacy file and staging directories
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore the snapshot and print sub-state sizes
    Inspect,

    /// Delete the snapshot, its backup, the legacy file and staging leftovers
    Purge,
}

impl Cli {
    fn cache_config(&self) -> Result<CacheConfig> {
        let mut config = match &self.config {
            Some(path) => CacheConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => CacheConfig::from_env()?,
        };
        if let Some(root) = &self.cache_root {
            config.cache_root = root.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init();

    let config = cli.cache_config()?;
    tracing::debug!(cache_root = %config.cache_root.display(), "using cache root");

    match cli.command {
        Commands::Status { json } => commands::status(config, json).await?,
        Commands::Inspect => commands::inspect(config).await?,
        Commands::Purge => commands::purge(config).await?,
    }

    Ok(())
}
