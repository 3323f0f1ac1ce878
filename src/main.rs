//! jobscout - state-driven job discovery worker.
//!
//! Polls a shared work queue, advances each item through its pipeline,
//! and persists analyzed job matches.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobscout::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "jobscout=debug"
    } else {
        "jobscout=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
