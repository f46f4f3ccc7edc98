//! Dispatcher handle
//!
//! Cheap to clone and safe to use from many tasks at once. Every call either
//! talks to the backend adapter directly or enqueues into the monitor's
//! intake channel; none of them touch the watch set.

use relay_core::JobPhase;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::IntakeMessage;
use super::lifecycle::DispatchContext;
use super::monitor::Monitor;
use crate::backend::BackendAdapter;
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::repository::JobWrapper;
use crate::service::composer::CommandComposer;
use crate::state::JobStateRecord;

/// How `recover` brought a job back under watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    /// Watched again under its recorded backend id
    Reattached,
    /// Never reached the backend; submitted anew under this id
    Resubmitted(String),
    /// Already terminal, nothing to watch
    Skipped,
}

/// Handle for submitting work to one backend
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<DispatchContext>,
    intake: mpsc::Sender<IntakeMessage>,
}

impl Dispatcher {
    /// Creates a dispatcher and the monitor that must be run for it
    pub fn new(
        config: DispatcherConfig,
        adapter: Arc<dyn BackendAdapter>,
        composer: Arc<dyn CommandComposer>,
    ) -> (Self, Monitor) {
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));
        let ctx = Arc::new(DispatchContext {
            adapter,
            composer,
            config,
        });

        let dispatcher = Self {
            ctx: Arc::clone(&ctx),
            intake: tx,
        };
        (dispatcher, Monitor::new(ctx, rx))
    }

    /// Creates a dispatcher and runs its monitor on the tokio runtime
    pub fn spawn(
        config: DispatcherConfig,
        adapter: Arc<dyn BackendAdapter>,
        composer: Arc<dyn CommandComposer>,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, monitor) = Self::new(config, adapter, composer);
        (dispatcher, tokio::spawn(monitor.run()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.ctx.adapter.name()
    }

    /// Validates, composes and launches a job, then hands it to the monitor
    ///
    /// Any failure before the backend accepted the job fails it locally
    /// through the finish hook and is returned to the caller as well.
    pub async fn submit(&self, wrapper: Arc<dyn JobWrapper>) -> Result<String> {
        let job_id = wrapper.job_id();
        let mut record = self.ctx.new_record(Arc::clone(&wrapper), JobPhase::New);

        let launch = match self.ctx.prepare_launch(wrapper.job()) {
            Ok(launch) => launch,
            Err(e) => {
                self.ctx.fail_record(&mut record, e.to_string()).await;
                return Err(e);
            }
        };

        let backend_job_id = match self.ctx.adapter.submit(&launch).await {
            Ok(id) => id,
            Err(e) => {
                let message = format!(
                    "submission to the {} backend failed: {}",
                    self.ctx.adapter.name(),
                    e
                );
                self.ctx.fail_record(&mut record, message).await;
                return Err(DispatchError::Submission(e));
            }
        };

        info!(
            "Job {} accepted by the {} backend as {}",
            job_id,
            self.ctx.adapter.name(),
            backend_job_id
        );

        record.backend_job_id = Some(backend_job_id.clone());
        record.launch = Some(launch);

        // The job already exists remotely; persistence hiccups must not lose it
        if let Err(e) = wrapper.set_external_id(&backend_job_id).await {
            warn!("Failed to persist backend id of job {}: {:#}", job_id, e);
        }
        // A job recovered as RUNNING keeps its phase
        let persisted = wrapper.phase().await;
        if persisted.can_transition_to(JobPhase::Queued) {
            if let Err(e) = wrapper.change_state(JobPhase::Queued).await {
                warn!("Failed to persist QUEUED for job {}: {:#}", job_id, e);
            }
            record.advance(JobPhase::Queued);
        } else if persisted.is_active() {
            record.advance(persisted);
        }

        self.watch(record).await?;
        Ok(backend_job_id)
    }

    /// Brings a job persisted as QUEUED or RUNNING back under watch
    ///
    /// With a recorded backend id the job is reattached without touching the
    /// backend; without one it never launched and is submitted again.
    pub async fn recover(
        &self,
        wrapper: Arc<dyn JobWrapper>,
        backend_job_id: Option<String>,
    ) -> Result<Recovered> {
        let job_id = wrapper.job_id();
        let persisted = wrapper.phase().await;
        if persisted.is_terminal() {
            return Ok(Recovered::Skipped);
        }

        let Some(backend_job_id) = backend_job_id else {
            info!("Job {} has no backend id; submitting it again", job_id);
            let id = self.submit(wrapper).await?;
            return Ok(Recovered::Resubmitted(id));
        };

        let phase = match persisted {
            JobPhase::Running => JobPhase::Running,
            _ => JobPhase::Queued,
        };
        let mut record = self.ctx.new_record(Arc::clone(&wrapper), phase);
        record.backend_job_id = Some(backend_job_id.clone());

        // Only needed for "retry later" resubmissions
        match self.ctx.prepare_launch(wrapper.job()) {
            Ok(launch) => record.launch = Some(launch),
            Err(e) => warn!(
                "Job {} cannot be relaunched if its backend asks for a retry: {}",
                job_id, e
            ),
        }

        info!(
            "Reattached job {} to {} job {} in phase {}",
            job_id,
            self.ctx.adapter.name(),
            backend_job_id,
            phase
        );
        self.watch(record).await?;
        Ok(Recovered::Reattached)
    }

    /// Best-effort cancellation
    ///
    /// DELETED is persisted first and regardless of the remote outcome, so a
    /// result the monitor polls afterwards cannot overwrite it.
    pub async fn stop(&self, wrapper: Arc<dyn JobWrapper>) -> Result<()> {
        let job_id = wrapper.job_id();

        if !wrapper.phase().await.is_terminal() {
            wrapper
                .change_state(JobPhase::Deleted)
                .await
                .map_err(DispatchError::Hook)?;
        }

        if let Some(backend_job_id) = wrapper.external_id().await {
            if let Err(e) = self.ctx.adapter.cancel(&backend_job_id).await {
                warn!(
                    "Failed to cancel {} job {}: {}",
                    self.ctx.adapter.name(),
                    backend_job_id,
                    e
                );
            }
        }

        // A closed intake means nothing is watched anymore
        let _ = self.intake.send(IntakeMessage::Forget(job_id)).await;

        info!("Stopped job {}", job_id);
        Ok(())
    }

    /// Fails a job without involving the backend
    pub async fn fail_job_local(
        &self,
        wrapper: Arc<dyn JobWrapper>,
        message: impl Into<String>,
    ) -> Result<()> {
        let job_id = wrapper.job_id();
        let phase = wrapper.phase().await;
        if phase.is_terminal() {
            return Ok(());
        }

        let mut record = self.ctx.new_record(Arc::clone(&wrapper), phase);
        record.backend_job_id = wrapper.external_id().await;

        let _ = self.intake.send(IntakeMessage::Forget(job_id)).await;

        if self.ctx.fail_record(&mut record, message).await {
            Ok(())
        } else {
            Err(DispatchError::Hook(anyhow::anyhow!(
                "finish hook of job {} failed",
                job_id
            )))
        }
    }

    /// Asks the monitor to tear down and exit after its current cycle
    pub async fn shutdown(&self) -> Result<()> {
        self.intake
            .send(IntakeMessage::Shutdown)
            .await
            .map_err(|_| DispatchError::Closed)
    }

    async fn watch(&self, record: JobStateRecord) -> Result<()> {
        if let Err(mpsc::error::SendError(message)) =
            self.intake.send(IntakeMessage::Watch(Box::new(record))).await
        {
            // Nobody would ever poll it; cancel and report it like any other failure
            if let IntakeMessage::Watch(mut record) = message {
                self.ctx
                    .fail_record(&mut record, "dispatcher shut down before the job was watched")
                    .await;
            }
            return Err(DispatchError::Closed);
        }
        Ok(())
    }
}
