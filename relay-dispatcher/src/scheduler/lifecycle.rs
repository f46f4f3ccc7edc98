//! Lifecycle steps shared by the dispatcher handle and the monitor
//!
//! Launch preparation and the single finish path live here so that a job
//! failed before launch, lost by its backend or finished normally all reach
//! the wrapper's finish hook the same way.

use relay_core::{Job, JobPhase};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{BackendAdapter, LaunchRequest};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::repository::JobWrapper;
use crate::service::composer::CommandComposer;
use crate::state::{JobPaths, JobStateRecord, backend_job_name};

/// Collaborators of one dispatcher instance
pub(crate) struct DispatchContext {
    pub adapter: Arc<dyn BackendAdapter>,
    pub composer: Arc<dyn CommandComposer>,
    pub config: DispatcherConfig,
}

impl DispatchContext {
    pub fn paths_for(&self, job: &Job) -> JobPaths {
        JobPaths::for_job(&self.config.working_dir, job.id)
    }

    /// Fresh record for a job, starting in `phase`
    pub fn new_record(&self, wrapper: Arc<dyn JobWrapper>, phase: JobPhase) -> JobStateRecord {
        let paths = self.paths_for(wrapper.job());
        JobStateRecord::new(wrapper, paths, phase)
    }

    /// Validates the destination and composes the command
    ///
    /// Nothing touches the filesystem or the backend before validation passed.
    pub fn prepare_launch(&self, job: &Job) -> Result<LaunchRequest> {
        let params = self
            .adapter
            .destination_schema()
            .resolve(&job.destination)?;

        let paths = self.paths_for(job);
        let composed = self
            .composer
            .compose(job, &paths)
            .map_err(DispatchError::Compose)?;

        Ok(LaunchRequest {
            job_id: job.id,
            job_name: backend_job_name(&self.config.job_name_prefix, job.id),
            tool_id: job.tool_id.clone(),
            tool_version: job.tool_version.clone(),
            command: composed.command,
            precheck_script: composed.precheck_script,
            params,
            paths,
        })
    }

    /// Moves the record to its terminal `phase` and reports it upstream
    ///
    /// Returns `true` once the outcome is delivered (or no longer wanted) and
    /// the record can be forgotten; `false` keeps it for a hook retry.
    pub async fn complete(&self, record: &mut JobStateRecord, phase: JobPhase) -> bool {
        record.advance(phase);

        if let Err(e) = record.write_outputs().await {
            warn!("Failed to write output files of job {}: {}", record.job_id, e);
        }

        if record.wrapper.phase().await.is_terminal() {
            debug!(
                "Job {} is already terminal upstream; not reporting {}",
                record.job_id,
                record.phase()
            );
            return true;
        }

        let outcome = record.outcome();
        match record.wrapper.finish(&outcome).await {
            Ok(()) => {
                match outcome.fail_message.as_deref() {
                    Some(message) => info!(
                        "Job {} finished as {}: {}",
                        record.job_id, outcome.phase, message
                    ),
                    None => info!("Job {} finished as {}", record.job_id, outcome.phase),
                }
                true
            }
            Err(e) => {
                warn!(
                    "Finish hook of job {} failed, retrying next cycle: {:#}",
                    record.job_id, e
                );
                false
            }
        }
    }

    /// Fails a record through the common finish path
    ///
    /// A remote cancel is only attempted when the job was submitted and may
    /// still be running.
    pub async fn fail_record(
        &self,
        record: &mut JobStateRecord,
        message: impl Into<String>,
    ) -> bool {
        record.record_failure(message);

        if record.is_submitted() && record.phase().is_active() {
            if let Some(backend_job_id) = record.backend_job_id.clone() {
                if let Err(e) = self.adapter.cancel(&backend_job_id).await {
                    warn!(
                        "Failed to cancel {} job {} after failure: {}",
                        self.adapter.name(),
                        backend_job_id,
                        e
                    );
                }
            }
        }

        self.complete(record, JobPhase::Error).await
    }
}
