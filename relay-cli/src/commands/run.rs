//! Run command handler
//!
//! Submits one command to the configured backend, waits for the terminal
//! phase and prints where its output went. Ctrl-C stops the job.

use anyhow::Result;
use clap::Args;
use colored::*;
use relay_core::{Job, JobId};
use relay_dispatcher::{
    Dispatcher, InMemoryJobWrapper, JobWrapper, PassthroughComposer, build_backend,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{parse_param, print_outcome};
use crate::config::Config;

#[derive(Args)]
pub struct RunArgs {
    /// Tool identifier recorded with the job
    #[arg(long, default_value = "shell")]
    pub tool: String,

    /// Tool version recorded with the job
    #[arg(long = "tool-version", default_value = "1.0")]
    pub tool_version: String,

    /// Internal job id; also names the job's working directory
    #[arg(long, default_value_t = 1)]
    pub job_id: JobId,

    /// Destination parameter, repeatable (e.g., --param memory=4G)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Command line to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub async fn handle_run_command(args: RunArgs, config: &Config) -> Result<()> {
    let config = config.dispatcher_config()?;
    let backend = build_backend(&config);
    let backend_name = backend.name();

    let mut job = Job::new(args.job_id, args.tool, args.tool_version)
        .with_command(args.command.join(" "));
    for (key, value) in args.params {
        job = job.with_param(key, value);
    }

    let wrapper = Arc::new(InMemoryJobWrapper::new(job));
    let (dispatcher, monitor) = Dispatcher::spawn(config, backend, Arc::new(PassthroughComposer));

    let backend_job_id = dispatcher.submit(wrapper.clone()).await?;
    println!(
        "{} Submitted job {} to the {} backend as {}",
        "✓".green(),
        args.job_id,
        backend_name,
        backend_job_id.cyan()
    );

    tokio::select! {
        _ = wait_for_outcome(&wrapper) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; stopping job {}", args.job_id);
            dispatcher.stop(wrapper.clone()).await?;
        }
    }

    dispatcher.shutdown().await?;
    monitor.await?;

    match wrapper.last_outcome() {
        Some(outcome) => {
            print_outcome(&outcome);
            if !outcome.succeeded() {
                anyhow::bail!("job {} finished as {}", outcome.job_id, outcome.phase);
            }
        }
        None => println!(
            "{}",
            format!("Job {} is {}", args.job_id, wrapper.phase().await).yellow()
        ),
    }

    Ok(())
}

async fn wait_for_outcome(wrapper: &InMemoryJobWrapper) {
    while wrapper.last_outcome().is_none() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
