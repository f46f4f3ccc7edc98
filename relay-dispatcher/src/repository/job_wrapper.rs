//! Job wrapper
//!
//! The persisted job entity the dispatcher reports to. The dispatcher never
//! talks to storage itself: it reads the job through this trait, records the
//! backend id and phase changes, and calls [`JobWrapper::finish`] exactly once
//! per terminal outcome.

use anyhow::Result;
use async_trait::async_trait;
use relay_core::{Job, JobId, JobOutcome, JobPhase};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Persisted job entity, owned outside the dispatcher
///
/// The dispatcher holds a shared handle while the job is watched and drops it
/// once the outcome has been reported; it never decides the entity's lifetime.
#[async_trait]
pub trait JobWrapper: Send + Sync {
    /// The job as it was when handed to the dispatcher
    fn job(&self) -> &Job;

    fn job_id(&self) -> JobId {
        self.job().id
    }

    /// Backend id recorded for this job, if it was ever submitted
    async fn external_id(&self) -> Option<String>;

    /// Currently persisted phase
    async fn phase(&self) -> JobPhase;

    /// Persists a non-terminal phase change (or DELETED from `stop`)
    async fn change_state(&self, phase: JobPhase) -> Result<()>;

    /// Persists the backend id right after a successful launch
    async fn set_external_id(&self, external_id: &str) -> Result<()>;

    /// Finish/fail hook; receives every terminal outcome, whatever its cause
    async fn finish(&self, outcome: &JobOutcome) -> Result<()>;
}

#[derive(Debug, Default)]
struct WrapperState {
    phase: Option<JobPhase>,
    external_id: Option<String>,
    transitions: Vec<JobPhase>,
    outcomes: Vec<JobOutcome>,
}

/// Job wrapper that keeps everything in memory
///
/// Used by the CLI, where there is no database, and by tests that need to
/// inspect what the dispatcher reported.
#[derive(Debug)]
pub struct InMemoryJobWrapper {
    job: Job,
    state: Mutex<WrapperState>,
}

impl InMemoryJobWrapper {
    pub fn new(job: Job) -> Self {
        let state = WrapperState {
            phase: Some(job.phase),
            external_id: job.external_id.clone(),
            ..Default::default()
        };
        Self {
            job,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, WrapperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every phase persisted so far, in order
    pub fn transitions(&self) -> Vec<JobPhase> {
        self.state().transitions.clone()
    }

    /// Every outcome passed to the finish hook
    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.state().outcomes.clone()
    }

    pub fn last_outcome(&self) -> Option<JobOutcome> {
        self.state().outcomes.last().cloned()
    }

    /// Snapshot of the job with the persisted phase and external id applied
    pub fn snapshot(&self) -> Job {
        let state = self.state();
        let mut job = self.job.clone();
        job.phase = state.phase.unwrap_or(job.phase);
        job.external_id = state.external_id.clone();
        job
    }
}

#[async_trait]
impl JobWrapper for InMemoryJobWrapper {
    fn job(&self) -> &Job {
        &self.job
    }

    async fn external_id(&self) -> Option<String> {
        self.state().external_id.clone()
    }

    async fn phase(&self) -> JobPhase {
        self.state().phase.unwrap_or(self.job.phase)
    }

    async fn change_state(&self, phase: JobPhase) -> Result<()> {
        let mut state = self.state();
        state.phase = Some(phase);
        state.transitions.push(phase);
        Ok(())
    }

    async fn set_external_id(&self, external_id: &str) -> Result<()> {
        self.state().external_id = Some(external_id.to_string());
        Ok(())
    }

    async fn finish(&self, outcome: &JobOutcome) -> Result<()> {
        let mut state = self.state();
        state.phase = Some(outcome.phase);
        state.transitions.push(outcome.phase);
        state.outcomes.push(outcome.clone());
        Ok(())
    }
}
