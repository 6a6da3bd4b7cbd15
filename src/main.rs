//! photarc - local photo indexing and enrichment service.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photarc::cli;
use photarc::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // The env filter wins; LOG_LEVEL sets the default for our own crate.
    let default_filter = format!("photarc={}", Settings::from_env().log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
