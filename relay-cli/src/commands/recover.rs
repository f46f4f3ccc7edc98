//! Recover command handler
//!
//! Reads a snapshot of persisted jobs, reattaches the in-flight ones and
//! optionally waits for them and writes the updated snapshot back.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use relay_core::Job;
use relay_dispatcher::{
    Dispatcher, InMemoryJobWrapper, JobWrapper, PassthroughComposer, build_backend, recover_jobs,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::print_outcome;
use crate::config::Config;

#[derive(Args)]
pub struct RecoverArgs {
    /// JSON snapshot of persisted jobs
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Wait until every recovered job is terminal
    #[arg(long)]
    pub wait: bool,

    /// Write the updated snapshot here
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Print the recovery summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Persisted jobs as exchanged with the CLI
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub jobs: Vec<Job>,
}

impl Snapshot {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write snapshot {}", path.display()))
    }
}

pub async fn handle_recover_command(args: RecoverArgs, config: &Config) -> Result<()> {
    let snapshot = Snapshot::load(&args.snapshot).await?;
    let config = config.dispatcher_config()?;
    let backend = build_backend(&config);
    let (dispatcher, monitor) = Dispatcher::spawn(config, backend, Arc::new(PassthroughComposer));

    let wrappers: Vec<Arc<InMemoryJobWrapper>> = snapshot
        .jobs
        .into_iter()
        .map(|job| Arc::new(InMemoryJobWrapper::new(job)))
        .collect();
    let handles: Vec<Arc<dyn JobWrapper>> = wrappers
        .iter()
        .map(|w| Arc::clone(w) as Arc<dyn JobWrapper>)
        .collect();

    let summary = recover_jobs(&dispatcher, handles).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} Recovery: {}", "✓".green(), summary);
    }

    if args.wait {
        wait_until_terminal(&wrappers).await;
        println!();
        for wrapper in &wrappers {
            if let Some(outcome) = wrapper.last_outcome() {
                print_outcome(&outcome);
            }
        }
    }

    dispatcher.shutdown().await?;
    monitor.await?;

    if let Some(output) = &args.output {
        let updated = Snapshot {
            jobs: wrappers.iter().map(|w| w.snapshot()).collect(),
        };
        updated.save(output).await?;
        println!(
            "{}",
            format!("Wrote snapshot to {}", output.display()).dimmed()
        );
    }

    Ok(())
}

async fn wait_until_terminal(wrappers: &[Arc<InMemoryJobWrapper>]) {
    loop {
        let mut pending = false;
        for wrapper in wrappers {
            if !wrapper.phase().await.is_terminal() {
                pending = true;
                break;
            }
        }
        if !pending {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::JobPhase;

    #[tokio::test]
    async fn test_snapshot_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(
            &path,
            r#"{"jobs": [
                {"id": 7, "tool_id": "bwa", "tool_version": "0.7.17", "phase": "RUNNING",
                 "external_id": "4242", "destination": {"cpus": "4"}}
            ]}"#,
        )
        .await
        .unwrap();

        let snapshot = Snapshot::load(&path).await.unwrap();
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].phase, JobPhase::Running);
        assert_eq!(snapshot.jobs[0].external_id.as_deref(), Some("4242"));
        assert!(snapshot.jobs[0].command_line.is_none());

        let out = dir.path().join("out.json");
        snapshot.save(&out).await.unwrap();
        let reloaded = Snapshot::load(&out).await.unwrap();
        assert_eq!(reloaded.jobs[0].destination.get("cpus").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_reported() {
        let err = Snapshot::load(Path::new("/nonexistent/jobs.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read snapshot"));
    }
}
