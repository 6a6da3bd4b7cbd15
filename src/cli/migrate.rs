//! The `migrate` command.

use crate::config::Settings;
use crate::repository::migrations;

pub async fn cmd_migrate(settings: Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    migrations::run_migrations(&settings.database_url()).await?;
    println!("database ready at {}", settings.database_path().display());
    Ok(())
}
