//! Relay CLI
//!
//! Command-line front end for the relay dispatcher: run a single command on a
//! backend, recover jobs from a snapshot, or inspect job definition keys.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use relay_dispatcher::BackendKind;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Dispatch jobs to local, cluster or cloud batch backends", long_about = None)]
struct Cli {
    /// Execution backend (local, scheduler, batch)
    #[arg(long, env = "RELAY_BACKEND")]
    backend: Option<BackendKind>,

    /// Base directory for job files
    #[arg(long, env = "RELAY_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Seconds between two status polls
    #[arg(long, env = "RELAY_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=info,relay_dispatcher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        backend: cli.backend,
        working_dir: cli.working_dir,
        poll_interval: cli.poll_interval,
    };

    handle_command(cli.command, &config).await
}
