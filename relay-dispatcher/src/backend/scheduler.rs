//! Cluster scheduler backend
//!
//! Drives an HPC scheduler through its command-line tools (Slurm's `sbatch`,
//! `squeue` and `scancel` by default). Each job becomes a batch script in its
//! working directory; status comes from one `<id> <state>` line per job.
//! Jobs the scheduler has already forgotten are settled from their exit-code
//! file, and only reported lost when that file is missing too.

use async_trait::async_trait;
use relay_core::{
    DestinationSchema, ExitCodePolicy, JobPhase, ParamKind, ParamSpec, ParamValue,
};
use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    BackendAdapter, BackendPhase, BackendStatus, LaunchRequest, PollTarget, read_exit_code,
    resource_env, shell_quote, wrap_command,
};
use crate::config::SchedulerSettings;
use crate::error::BackendError;

/// Ids per status call, keeps command lines short
const MAX_STATUS_IDS: usize = 100;

/// Exit code a job uses to ask for a later resubmission
const RETRY_LATER_EXIT_CODE: i32 = 255;

/// Scheduler state codes, grouped by what they mean for the dispatcher
fn map_state(code: &str) -> Option<(JobPhase, Option<&'static str>)> {
    let mapped = match code {
        "PD" | "CF" | "RQ" | "RF" => (JobPhase::Queued, None),
        "R" | "CG" | "S" | "ST" | "SO" => (JobPhase::Running, None),
        "CD" => (JobPhase::Ok, None),
        "F" => (JobPhase::Error, Some("job failed on the cluster")),
        "TO" => (JobPhase::Error, Some("job reached its time limit")),
        "NF" => (JobPhase::Error, Some("node failure")),
        "OOM" => (JobPhase::Error, Some("job ran out of memory")),
        "BF" => (JobPhase::Error, Some("boot failure")),
        "DL" => (JobPhase::Error, Some("job reached its deadline")),
        "PR" => (JobPhase::Error, Some("job was preempted")),
        "CA" => (JobPhase::Stopped, Some("job was cancelled on the cluster")),
        _ => return None,
    };
    Some(mapped)
}

/// Parses one `<id> <state>` line of status output
fn parse_status_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?;
    let state = parts.next()?;
    Some((id, state))
}

/// Backend submitting batch scripts to a cluster scheduler
pub struct SchedulerBackend {
    settings: SchedulerSettings,
    schema: DestinationSchema,
}

impl SchedulerBackend {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            schema: DestinationSchema::new(vec![
                ParamSpec::optional("queue", ParamKind::Text),
                ParamSpec::with_default("cpus", ParamKind::Int, ParamValue::Int(1)),
                ParamSpec::optional("memory", ParamKind::MemoryMb),
                ParamSpec::optional("walltime", ParamKind::Text),
            ]),
        }
    }

    /// Batch script with scheduler directives, resource env and the command
    fn render_script(&self, launch: &LaunchRequest) -> String {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("#SBATCH --job-name={}\n", launch.job_name));
        script.push_str(&format!(
            "#SBATCH --output={}\n",
            launch.paths.output_file.display()
        ));
        script.push_str(&format!(
            "#SBATCH --error={}\n",
            launch.paths.error_file.display()
        ));

        let cpus = launch.params.int("cpus");
        let memory = launch.params.int("memory");
        if let Some(cpus) = cpus {
            script.push_str(&format!("#SBATCH --cpus-per-task={}\n", cpus));
        }
        if let Some(memory) = memory {
            script.push_str(&format!("#SBATCH --mem={}M\n", memory));
        }
        if let Some(queue) = launch.params.text("queue") {
            script.push_str(&format!("#SBATCH --partition={}\n", queue));
        }
        if let Some(walltime) = launch.params.text("walltime") {
            script.push_str(&format!("#SBATCH --time={}\n", walltime));
        }

        for (name, value) in resource_env(cpus, memory) {
            script.push_str(&format!("export {}={}\n", name, shell_quote(&value)));
        }

        script.push_str(&wrap_command(launch));
        script
    }

    async fn run_shell(&self, command_line: &str) -> Result<Output, BackendError> {
        debug!("Running scheduler command: {}", command_line);
        Command::new("/bin/sh")
            .arg("-c")
            .arg(command_line)
            .output()
            .await
            .map_err(|e| BackendError::Process(format!("failed to run '{}': {}", command_line, e)))
    }

    /// Runs the status command for one chunk of ids
    async fn query_states(&self, ids: &[&str]) -> Result<HashMap<String, String>, BackendError> {
        let command_line = format!("{} {}", self.settings.status_command, ids.join(","));
        let output = self.run_shell(&command_line).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            // squeue refuses ids it has already purged; that just means "not listed"
            if stderr.contains("Invalid job id") {
                debug!("Scheduler no longer lists some of {:?}", ids);
            } else {
                return Err(BackendError::Process(format!(
                    "status command failed: exit_code={}, stderr='{}'",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )));
            }
        }

        Ok(stdout
            .lines()
            .filter_map(parse_status_line)
            .map(|(id, state)| (id.to_string(), state.to_string()))
            .collect())
    }

    /// Status of one target given the state the scheduler listed, if any
    async fn status_of(&self, target: &PollTarget, state: Option<&String>) -> BackendStatus {
        let Some(state) = state else {
            return self.settle_from_file(target, None).await;
        };

        match map_state(state) {
            None => BackendStatus::CheckFailed(format!("unrecognised scheduler state '{}'", state)),
            Some((JobPhase::Ok, _)) => self.settle_from_file(target, Some(0)).await,
            Some((JobPhase::Error, reason)) => {
                let mut phase = BackendPhase::new(JobPhase::Error);
                phase.exit_code = read_exit_code(&target.exit_code_file).await;
                phase.reason = reason.map(str::to_string);
                BackendStatus::Phase(phase)
            }
            Some((phase, reason)) => {
                let mut phase = BackendPhase::new(phase);
                phase.reason = reason.map(str::to_string);
                BackendStatus::Phase(phase)
            }
        }
    }

    async fn settle_from_file(&self, target: &PollTarget, fallback: Option<i32>) -> BackendStatus {
        match read_exit_code(&target.exit_code_file).await.or(fallback) {
            Some(code) => BackendStatus::Phase(BackendPhase::finished(code)),
            None => BackendStatus::Lost,
        }
    }
}

#[async_trait]
impl BackendAdapter for SchedulerBackend {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn destination_schema(&self) -> &DestinationSchema {
        &self.schema
    }

    fn exit_code_policy(&self) -> ExitCodePolicy {
        ExitCodePolicy::with_retry_code(RETRY_LATER_EXIT_CODE)
    }

    fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn submit(&self, launch: &LaunchRequest) -> Result<String, BackendError> {
        launch.paths.prepare().await?;

        let script_path = launch
            .paths
            .working_directory
            .join(format!("{}.sh", launch.job_name));
        tokio::fs::write(&script_path, self.render_script(launch)).await?;

        let command_line = format!(
            "{} {}",
            self.settings.submit_command,
            shell_quote(&script_path.to_string_lossy())
        );
        let output = self.run_shell(&command_line).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            return Err(BackendError::Process(format!(
                "submit command failed: exit_code={}, stderr='{}'",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // `--parsable` prints "<id>" or "<id>;<cluster>"
        let backend_job_id = stdout
            .trim()
            .split(';')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BackendError::Protocol(format!("submit command printed no job id: '{}'", stdout))
            })?
            .to_string();

        info!(
            "Submitted job {} ({}) to the scheduler as {}",
            launch.job_id, launch.job_name, backend_job_id
        );
        Ok(backend_job_id)
    }

    async fn poll(
        &self,
        targets: &[PollTarget],
    ) -> Result<HashMap<String, BackendStatus>, BackendError> {
        let mut statuses = HashMap::with_capacity(targets.len());

        for chunk in targets.chunks(MAX_STATUS_IDS) {
            let ids: Vec<&str> = chunk.iter().map(|t| t.backend_job_id.as_str()).collect();

            let states = match self.query_states(&ids).await {
                Ok(states) => states,
                Err(e) => {
                    // Only this chunk goes unchecked; the others still settle
                    warn!("Failed to query {} scheduler job(s): {}", chunk.len(), e);
                    for target in chunk {
                        statuses.insert(
                            target.backend_job_id.clone(),
                            BackendStatus::CheckFailed(e.to_string()),
                        );
                    }
                    continue;
                }
            };

            for target in chunk {
                let status = self
                    .status_of(target, states.get(&target.backend_job_id))
                    .await;
                statuses.insert(target.backend_job_id.clone(), status);
            }
        }

        Ok(statuses)
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError> {
        let command_line = format!(
            "{} {}",
            self.settings.cancel_command,
            shell_quote(backend_job_id)
        );
        let output = self.run_shell(&command_line).await?;

        if !output.status.success() {
            // Usually the job already finished; nothing left to cancel
            warn!(
                "Cancel of scheduler job {} returned exit_code={}: {}",
                backend_job_id,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
