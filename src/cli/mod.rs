//! CLI commands implementation.

mod duplicates;
mod migrate;
mod scan;
mod serve;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "photarc")]
#[command(about = "Local photo indexing and enrichment service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server: pipeline workers, watcher, initial scan, and API.
    Serve,
    /// Run one full scan-and-enrich pass, then exit.
    Scan,
    /// Apply pending database migrations.
    Migrate,
    /// Recompute duplicate groups and print them.
    Duplicates,
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Serve => serve::cmd_serve(settings).await,
        Command::Scan => scan::cmd_scan(settings).await,
        Command::Migrate => migrate::cmd_migrate(settings).await,
        Command::Duplicates => duplicates::cmd_duplicates(settings).await,
    }
}
