//! Command-line interface for jobscout.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Check verbosity from raw args, before the logger is initialized.
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Parser)]
#[command(name = "jobscout", version, about = "State-driven job discovery worker")]
pub struct Cli {
    /// Path to a config file (JSON, TOML, or YAML)
    #[arg(long, global = true, env = "JOBSCOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory override
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run worker loops against the queue
    Run {
        /// Number of concurrent worker loops
        #[arg(long, default_value_t = 2)]
        workers: usize,
        /// Exit once the queue is drained; non-zero exit if anything failed
        #[arg(long)]
        drain: bool,
        /// Also run the scrape-cycle scheduler
        #[arg(long)]
        scheduler: bool,
    },
    /// Submit a work item
    Submit {
        /// Item type: job, company, or source_discovery
        #[arg(value_name = "TYPE")]
        item_type: String,
        /// Input URL
        url: String,
        /// Company name hint (for company items)
        #[arg(long)]
        name: Option<String>,
    },
    /// Manage scrape sources
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Show queue and worker status
    Status,
}

#[derive(Subcommand)]
pub enum SourceAction {
    /// List all sources with health
    List,
    /// Enable a source
    Enable { id: String },
    /// Disable a source
    Disable { id: String },
    /// Discover and add a source from a URL
    Add { url: String },
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::dispatch(cli).await
}
