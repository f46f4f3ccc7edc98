//! Local process backend
//!
//! Runs each job as a `/bin/sh -c` child of the dispatcher process with
//! stdout and stderr redirected into the job's files. The wrapper script
//! writes the exit code next to them. A restarted dispatcher no longer owns the
//! processes it launched before; it settles them from that file, or checks the
//! pid encoded in the backend id while the file is still missing.

use async_trait::async_trait;
use relay_core::{DestinationSchema, ParamKind, ParamSpec, ParamValue};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{
    BackendAdapter, BackendPhase, BackendStatus, LaunchRequest, PollTarget, read_exit_code,
    resource_env, wrap_command,
};
use crate::error::BackendError;

/// What a synchronous look at a child process found
enum ChildState {
    Running,
    Exited(Option<i32>),
    Unknown,
    Failed(String),
}

/// Pid encoded in a `local-<pid>` backend id
fn parse_pid(backend_job_id: &str) -> Option<u32> {
    backend_job_id.strip_prefix("local-")?.parse().ok()
}

/// Sends `signal` to a process this backend does not own
///
/// Returns whether the process accepted it, so signal `0` checks liveness.
async fn send_signal(pid: u32, signal: &str) -> Result<bool, BackendError> {
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -{} {}", signal, pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| BackendError::Process(format!("failed to signal process {}: {}", pid, e)))?;
    Ok(status.success())
}

/// Backend running jobs as local subprocesses
pub struct LocalProcessBackend {
    schema: DestinationSchema,
    children: Mutex<HashMap<String, Child>>,
}

impl LocalProcessBackend {
    pub fn new() -> Self {
        Self {
            schema: DestinationSchema::new(vec![
                ParamSpec::with_default("slots", ParamKind::Int, ParamValue::Int(1)),
                ParamSpec::optional("memory", ParamKind::MemoryMb),
            ]),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn children(&self) -> MutexGuard<'_, HashMap<String, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of child processes still owned by this backend
    pub fn running_count(&self) -> usize {
        self.children().len()
    }

    fn inspect(&self, backend_job_id: &str) -> ChildState {
        let mut children = self.children();
        let Some(child) = children.get_mut(backend_job_id) else {
            return ChildState::Unknown;
        };

        match child.try_wait() {
            Ok(None) => ChildState::Running,
            Ok(Some(status)) => {
                children.remove(backend_job_id);
                ChildState::Exited(status.code())
            }
            Err(e) => ChildState::Failed(format!("failed to check process: {}", e)),
        }
    }
}

impl Default for LocalProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for LocalProcessBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn destination_schema(&self) -> &DestinationSchema {
        &self.schema
    }

    fn min_poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn submit(&self, launch: &LaunchRequest) -> Result<String, BackendError> {
        launch.paths.prepare().await?;

        let stdout = tokio::fs::File::create(&launch.paths.output_file)
            .await?
            .into_std()
            .await;
        let stderr = tokio::fs::File::create(&launch.paths.error_file)
            .await?
            .into_std()
            .await;

        let env = resource_env(launch.params.int("slots"), launch.params.int("memory"));

        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(wrap_command(launch))
            .current_dir(&launch.paths.working_directory)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| BackendError::Process(format!("failed to spawn /bin/sh: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| BackendError::Process("child exited before reporting a pid".into()))?;
        let backend_job_id = format!("local-{}", pid);

        info!(
            "Started local process {} for job {} ({})",
            pid, launch.job_id, launch.job_name
        );

        self.children().insert(backend_job_id.clone(), child);
        Ok(backend_job_id)
    }

    async fn poll(
        &self,
        targets: &[PollTarget],
    ) -> Result<HashMap<String, BackendStatus>, BackendError> {
        let mut statuses = HashMap::with_capacity(targets.len());

        for target in targets {
            let status = match self.inspect(&target.backend_job_id) {
                ChildState::Running => BackendStatus::Phase(BackendPhase::new(
                    relay_core::JobPhase::Running,
                )),
                ChildState::Exited(code) => {
                    // The wrapper's record wins; a signal leaves no code at all
                    let code = read_exit_code(&target.exit_code_file).await.or(code);
                    match code {
                        Some(code) => BackendStatus::Phase(BackendPhase::finished(code)),
                        None => BackendStatus::Phase(
                            BackendPhase::new(relay_core::JobPhase::Error)
                                .with_reason("process was terminated by a signal"),
                        ),
                    }
                }
                ChildState::Unknown => settle_untracked(target).await,
                ChildState::Failed(message) => BackendStatus::CheckFailed(message),
            };
            statuses.insert(target.backend_job_id.clone(), status);
        }

        Ok(statuses)
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError> {
        let Some(mut child) = self.children().remove(backend_job_id) else {
            return cancel_untracked(backend_job_id).await;
        };

        if let Err(e) = child.start_kill() {
            // Already exited between the last poll and now
            debug!("Failed to signal process {}: {}", backend_job_id, e);
        }

        let id = backend_job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!("Failed to reap cancelled process {}: {}", id, e);
            }
        });

        info!("Cancelled local process {}", backend_job_id);
        Ok(())
    }

    async fn shutdown(&self) {
        let remaining = self.running_count();
        if remaining > 0 {
            info!(
                "Leaving {} local process(es) running for a later recovery",
                remaining
            );
        }
    }
}

/// Status of a process launched by an earlier dispatcher
async fn settle_untracked(target: &PollTarget) -> BackendStatus {
    if let Some(code) = read_exit_code(&target.exit_code_file).await {
        debug!(
            "Settling untracked process {} from its exit code file",
            target.backend_job_id
        );
        return BackendStatus::Phase(BackendPhase::finished(code));
    }

    let Some(pid) = parse_pid(&target.backend_job_id) else {
        return BackendStatus::Lost;
    };
    match send_signal(pid, "0").await {
        Ok(true) => BackendStatus::Phase(BackendPhase::new(relay_core::JobPhase::Running)),
        Ok(false) => BackendStatus::Lost,
        Err(e) => BackendStatus::CheckFailed(e.to_string()),
    }
}

async fn cancel_untracked(backend_job_id: &str) -> Result<(), BackendError> {
    let Some(pid) = parse_pid(backend_job_id) else {
        debug!("{} is not a local process id; nothing to cancel", backend_job_id);
        return Ok(());
    };

    if send_signal(pid, "TERM").await? {
        info!("Cancelled untracked local process {}", backend_job_id);
    } else {
        debug!("Process {} is not running; nothing to cancel", backend_job_id);
    }
    Ok(())
}
