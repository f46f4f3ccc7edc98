//! Backend adapters
//!
//! One [`BackendAdapter`] per execution backend hides its protocol behind
//! submit / poll / cancel. The dispatcher's monitor loop is written once
//! against this trait and never special-cases a backend.
//!
//! Adapters must be safe to call concurrently: callers submit and stop jobs
//! from many tasks while the monitor polls.

mod batch;
mod local;
mod scheduler;

pub use batch::CloudBatchBackend;
pub use local::LocalProcessBackend;
pub use scheduler::SchedulerBackend;

use async_trait::async_trait;
use relay_core::{DestinationParams, DestinationSchema, ExitCodePolicy, JobId, JobPhase};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, DispatcherConfig};
use crate::error::BackendError;
use crate::state::JobPaths;

/// Name of the environment entry carrying the allotted CPU count
pub const SLOTS_ENV: &str = "RELAY_SLOTS";

/// Name of the environment entry carrying the memory budget in MB
pub const MEMORY_ENV: &str = "RELAY_MEMORY_MB";

/// Everything an adapter needs to launch one job
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job_id: JobId,
    /// Deterministic backend-side name
    pub job_name: String,
    pub tool_id: String,
    pub tool_version: String,
    pub command: String,
    pub precheck_script: Option<PathBuf>,
    pub params: DestinationParams,
    pub paths: JobPaths,
}

/// One watched job as seen by `poll`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub backend_job_id: String,
    pub exit_code_file: PathBuf,
}

/// Phase reported by a backend, with whatever detail it offered
#[derive(Debug, Clone, PartialEq)]
pub struct BackendPhase {
    pub phase: JobPhase,
    /// Backend's own status reason, used as the failure message
    pub reason: Option<String>,
    pub exit_code: Option<i32>,
    /// Output the backend handed back instead of writing the job files
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl BackendPhase {
    pub fn new(phase: JobPhase) -> Self {
        Self {
            phase,
            reason: None,
            exit_code: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn finished(exit_code: i32) -> Self {
        let phase = if exit_code == 0 {
            JobPhase::Ok
        } else {
            JobPhase::Error
        };
        Self {
            exit_code: Some(exit_code),
            ..Self::new(phase)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Result of checking one watched job
#[derive(Debug, Clone, PartialEq)]
pub enum BackendStatus {
    Phase(BackendPhase),
    /// The backend no longer recognises the id
    Lost,
    /// Checking this one job failed; try again next cycle
    CheckFailed(String),
}

/// Contract every execution backend implements
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short backend name used in logs and failure messages
    fn name(&self) -> &'static str;

    /// Destination parameters this backend accepts
    fn destination_schema(&self) -> &DestinationSchema;

    /// How finished jobs' exit codes are interpreted
    fn exit_code_policy(&self) -> ExitCodePolicy {
        ExitCodePolicy::strict()
    }

    /// Shortest sensible delay between two polls of this backend
    fn min_poll_interval(&self) -> Duration;

    /// Launches the job and returns the backend's id for it
    ///
    /// Errors are submission failures; nothing exists remotely afterwards.
    async fn submit(&self, launch: &LaunchRequest) -> Result<String, BackendError>;

    /// Reports the phase of every target
    ///
    /// Implementations chunk to the backend's batch limit and merge the
    /// results. Ids the backend no longer knows are reported as
    /// [`BackendStatus::Lost`] (or left out, which the dispatcher reads the
    /// same way). An `Err` means the whole poll failed and nothing was checked.
    async fn poll(
        &self,
        targets: &[PollTarget],
    ) -> Result<HashMap<String, BackendStatus>, BackendError>;

    /// Best-effort termination; succeeds when the job is already gone
    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError>;

    /// Looks up or registers the remote job definition for this launch
    async fn describe_or_register_definition(
        &self,
        _launch: &LaunchRequest,
    ) -> Result<String, BackendError> {
        Err(BackendError::Unsupported {
            operation: "job definitions",
            backend: self.name(),
        })
    }

    /// Teardown when the monitor loop exits
    async fn shutdown(&self) {}
}

/// Builds the adapter selected in the configuration
pub fn build_backend(config: &DispatcherConfig) -> Arc<dyn BackendAdapter> {
    match config.backend {
        BackendKind::Local => Arc::new(LocalProcessBackend::new()),
        BackendKind::Scheduler => Arc::new(SchedulerBackend::new(config.scheduler.clone())),
        BackendKind::Batch => Arc::new(CloudBatchBackend::new(
            Arc::new(relay_batch::BatchClient::new(config.batch.url.clone())),
            config.batch.clone(),
        )),
    }
}

/// Resource hints exported to the launched command
pub fn resource_env(slots: Option<i64>, memory_mb: Option<i64>) -> Vec<(String, String)> {
    let mut env = Vec::new();
    if let Some(slots) = slots {
        env.push((SLOTS_ENV.to_string(), slots.max(1).to_string()));
    }
    if let Some(memory_mb) = memory_mb {
        env.push((MEMORY_ENV.to_string(), memory_mb.to_string()));
    }
    env
}

/// Shell script body that runs the command and records its exit code
///
/// The precheck script, when present, must succeed for the command to run.
pub fn wrap_command(launch: &LaunchRequest) -> String {
    let mut script = String::new();
    if let Some(precheck) = &launch.precheck_script {
        script.push_str(&format!(
            "if ! /bin/sh {}; then echo 1 > {}; exit 1; fi\n",
            shell_quote(&precheck.to_string_lossy()),
            shell_quote(&launch.paths.exit_code_file.to_string_lossy())
        ));
    }
    script.push_str(&format!(
        "cd {}\n{}\nrelay_exit=$?\necho $relay_exit > {}\nexit $relay_exit\n",
        shell_quote(&launch.paths.working_directory.to_string_lossy()),
        launch.command,
        shell_quote(&launch.paths.exit_code_file.to_string_lossy())
    ));
    script
}

/// Single-quotes a value for `/bin/sh`
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Reads an exit-code file; `None` while the job has not written it
pub async fn read_exit_code(path: &Path) -> Option<i32> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content.trim().parse::<i32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch(dir: &Path) -> LaunchRequest {
        LaunchRequest {
            job_id: 5,
            job_name: "relay_5".to_string(),
            tool_id: "cat1".to_string(),
            tool_version: "1.0".to_string(),
            command: "echo hi".to_string(),
            precheck_script: None,
            params: DestinationParams::default(),
            paths: JobPaths::for_job(dir, 5),
        }
    }

    #[test]
    fn test_resource_env() {
        let env = resource_env(Some(4), Some(2048));
        assert_eq!(
            env,
            vec![
                ("RELAY_SLOTS".to_string(), "4".to_string()),
                ("RELAY_MEMORY_MB".to_string(), "2048".to_string()),
            ]
        );
        assert_eq!(resource_env(Some(0), None)[0].1, "1");
        assert!(resource_env(None, None).is_empty());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_wrap_command_records_exit_code() {
        let launch = launch(Path::new("/work"));
        let script = wrap_command(&launch);
        assert!(script.contains("cd '/work/5'"));
        assert!(script.contains("echo hi\n"));
        assert!(script.contains("echo $relay_exit > '/work/5/5.ec'"));
    }

    #[test]
    fn test_wrap_command_with_precheck() {
        let mut launch = launch(Path::new("/work"));
        launch.precheck_script = Some(PathBuf::from("/work/5/check.sh"));
        let script = wrap_command(&launch);
        assert!(script.starts_with("if ! /bin/sh '/work/5/check.sh'"));
    }

    #[tokio::test]
    async fn test_read_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.ec");
        assert_eq!(read_exit_code(&path).await, None);
        tokio::fs::write(&path, "3\n").await.unwrap();
        assert_eq!(read_exit_code(&path).await, Some(3));
        tokio::fs::write(&path, "").await.unwrap();
        assert_eq!(read_exit_code(&path).await, None);
    }

    #[test]
    fn test_finished_phase() {
        assert_eq!(BackendPhase::finished(0).phase, JobPhase::Ok);
        let failed = BackendPhase::finished(2);
        assert_eq!(failed.phase, JobPhase::Error);
        assert_eq!(failed.exit_code, Some(2));
    }
}
