//! Start-up recovery
//!
//! Reattaches every job the persistence layer still reports as QUEUED or
//! RUNNING. Jobs with a recorded backend id are watched again without
//! touching the backend; jobs without one never launched and are submitted.

use relay_core::JobPhase;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatcher::{Dispatcher, Recovered};
use crate::repository::JobWrapper;

/// What a recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoverySummary {
    pub reattached: usize,
    pub resubmitted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RecoverySummary {
    pub fn total(&self) -> usize {
        self.reattached + self.resubmitted + self.skipped + self.failed
    }
}

impl std::fmt::Display for RecoverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} reattached, {} resubmitted, {} skipped, {} failed",
            self.reattached, self.resubmitted, self.skipped, self.failed
        )
    }
}

/// Recovers every in-flight job in `wrappers`
pub async fn recover_jobs(
    dispatcher: &Dispatcher,
    wrappers: Vec<Arc<dyn JobWrapper>>,
) -> RecoverySummary {
    let mut summary = RecoverySummary::default();

    for wrapper in wrappers {
        let job_id = wrapper.job_id();
        if !matches!(wrapper.phase().await, JobPhase::Queued | JobPhase::Running) {
            summary.skipped += 1;
            continue;
        }

        let backend_job_id = wrapper.external_id().await;
        match dispatcher.recover(wrapper, backend_job_id).await {
            Ok(Recovered::Reattached) => summary.reattached += 1,
            Ok(Recovered::Resubmitted(_)) => summary.resubmitted += 1,
            Ok(Recovered::Skipped) => summary.skipped += 1,
            Err(e) => {
                warn!("Failed to recover job {}: {}", job_id, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Recovered {} job(s) on the {} backend: {}",
        summary.total(),
        dispatcher.backend_name(),
        summary
    );
    summary
}
