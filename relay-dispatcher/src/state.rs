//! Job state records
//!
//! A [`JobStateRecord`] is the dispatcher's working memory for one job. It is
//! created at submission or recovery time, lives exactly as long as the job is
//! in the monitor's watch set, and is never reused for a second backend job.

use chrono::Utc;
use relay_core::{JobId, JobOutcome, JobPhase};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::backend::{LaunchRequest, PollTarget};
use crate::repository::JobWrapper;

/// Files the dispatcher owns while a job is watched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub working_directory: PathBuf,
    pub output_file: PathBuf,
    pub error_file: PathBuf,
    pub exit_code_file: PathBuf,
}

impl JobPaths {
    /// `<base>/<job_id>/<job_id>_stdout`, `..._stderr` and `<job_id>.ec`
    pub fn for_job(base: &Path, job_id: JobId) -> Self {
        let working_directory = base.join(job_id.to_string());
        Self {
            output_file: working_directory.join(format!("{}_stdout", job_id)),
            error_file: working_directory.join(format!("{}_stderr", job_id)),
            exit_code_file: working_directory.join(format!("{}.ec", job_id)),
            working_directory,
        }
    }

    /// Creates the working directory
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.working_directory).await
    }

    /// Removes a stale exit-code file before a relaunch
    pub async fn clear_exit_code(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.exit_code_file).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Deterministic backend job name; stable across restarts
pub fn backend_job_name(prefix: &str, job_id: JobId) -> String {
    format!("{}_{}", prefix, job_id)
}

/// In-memory snapshot of one job's backend identity and progress
pub struct JobStateRecord {
    pub job_id: JobId,
    /// Unset until the backend accepted the job
    pub backend_job_id: Option<String>,
    phase: JobPhase,
    pub paths: JobPaths,
    fail_message: Option<String>,
    pub exit_code: Option<i32>,
    /// Output captured by the adapter, written out when the job finishes
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Launch parameters, kept for resubmission
    pub launch: Option<LaunchRequest>,
    pub resubmit_pending: bool,
    pub resubmits: u32,
    pub wrapper: Arc<dyn JobWrapper>,
}

impl JobStateRecord {
    pub fn new(wrapper: Arc<dyn JobWrapper>, paths: JobPaths, phase: JobPhase) -> Self {
        Self {
            job_id: wrapper.job_id(),
            backend_job_id: None,
            phase,
            paths,
            fail_message: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            launch: None,
            resubmit_pending: false,
            resubmits: 0,
            wrapper,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Moves to `next` if the edge is legal; returns whether the phase changed
    pub fn advance(&mut self, next: JobPhase) -> bool {
        if self.phase.can_transition_to(next) {
            self.phase = next;
            true
        } else {
            if self.phase.is_terminal() {
                warn!(
                    "Job {} is already {}; ignoring transition to {}",
                    self.job_id, self.phase, next
                );
            }
            false
        }
    }

    /// Records the first failure message; later messages are ignored
    pub fn record_failure(&mut self, message: impl Into<String>) -> bool {
        if self.fail_message.is_some() {
            return false;
        }
        self.fail_message = Some(message.into());
        true
    }

    pub fn fail_message(&self) -> Option<&str> {
        self.fail_message.as_deref()
    }

    /// Whether the backend ever accepted this job
    pub fn is_submitted(&self) -> bool {
        self.backend_job_id.is_some()
    }

    pub fn poll_target(&self) -> Option<PollTarget> {
        self.backend_job_id.as_ref().map(|id| PollTarget {
            backend_job_id: id.clone(),
            exit_code_file: self.paths.exit_code_file.clone(),
        })
    }

    pub fn outcome(&self) -> JobOutcome {
        JobOutcome {
            job_id: self.job_id,
            phase: self.phase,
            exit_code: self.exit_code,
            fail_message: self.fail_message.clone(),
            output_file: self.paths.output_file.clone(),
            error_file: self.paths.error_file.clone(),
            exit_code_file: self.paths.exit_code_file.clone(),
            finished_at: Utc::now(),
        }
    }

    /// Makes sure the three result files exist, writing captured output
    ///
    /// Files an adapter already wrote (a local process redirecting into them)
    /// are left alone unless output was captured separately.
    pub async fn write_outputs(&mut self) -> std::io::Result<()> {
        self.paths.prepare().await?;

        write_or_touch(&self.paths.output_file, self.stdout.take()).await?;
        write_or_touch(&self.paths.error_file, self.stderr.take()).await?;

        let exit_code = self.exit_code.map(|code| format!("{}\n", code));
        if !tokio::fs::try_exists(&self.paths.exit_code_file).await? {
            write_or_touch(&self.paths.exit_code_file, exit_code).await?;
        }

        Ok(())
    }
}

async fn write_or_touch(path: &Path, content: Option<String>) -> std::io::Result<()> {
    match content {
        Some(content) => tokio::fs::write(path, content).await,
        None => {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            Ok(())
        }
    }
}

impl std::fmt::Debug for JobStateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStateRecord")
            .field("job_id", &self.job_id)
            .field("backend_job_id", &self.backend_job_id)
            .field("phase", &self.phase)
            .field("fail_message", &self.fail_message)
            .field("resubmits", &self.resubmits)
            .finish()
    }
}
