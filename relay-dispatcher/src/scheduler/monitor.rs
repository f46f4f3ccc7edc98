//! Monitor loop
//!
//! Owns the watch set. Each cycle drains the intake, relaunches jobs whose
//! backend asked for a retry, retries failed finish hooks, polls every active
//! job in one batched call and applies the reported phases. Only this task
//! ever mutates the watch set.

use relay_core::{ExitDisposition, JobId, JobPhase};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::IntakeMessage;
use super::lifecycle::DispatchContext;
use crate::backend::{BackendPhase, BackendStatus, PollTarget, read_exit_code};
use crate::state::JobStateRecord;

/// What the caller of [`Monitor::run_cycle`] should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    Shutdown,
}

/// Background half of a dispatcher
pub struct Monitor {
    ctx: Arc<DispatchContext>,
    intake: mpsc::Receiver<IntakeMessage>,
    watched: HashMap<JobId, JobStateRecord>,
    shutdown_requested: bool,
    intake_closed: bool,
}

impl Monitor {
    pub(crate) fn new(ctx: Arc<DispatchContext>, intake: mpsc::Receiver<IntakeMessage>) -> Self {
        Self {
            ctx,
            intake,
            watched: HashMap::new(),
            shutdown_requested: false,
            intake_closed: false,
        }
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    pub fn is_watching(&self, job_id: JobId) -> bool {
        self.watched.contains_key(&job_id)
    }

    /// Delay between two cycles, never below the backend's own minimum
    pub fn interval(&self) -> Duration {
        self.ctx
            .config
            .poll_interval
            .max(self.ctx.adapter.min_poll_interval())
    }

    /// Runs cycles until a shutdown is requested or every handle is gone
    pub async fn run(mut self) {
        let interval = self.interval();
        info!(
            "Starting {} monitor (interval: {:?})",
            self.ctx.adapter.name(),
            interval
        );

        loop {
            if self.run_cycle().await == CycleOutcome::Shutdown {
                break;
            }
            self.wait(interval).await;
        }

        info!("{} monitor stopped", self.ctx.adapter.name());
    }

    /// Sleeps until the next cycle, accepting intake meanwhile
    ///
    /// Only a shutdown request ends the wait early; new jobs wait for the
    /// next cycle like everyone else.
    async fn wait(&mut self, interval: Duration) {
        let deadline = Instant::now() + interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                message = self.intake.recv(), if !self.intake_closed => {
                    match message {
                        Some(message) => self.accept(message),
                        None => self.intake_closed = true,
                    }
                    if self.stop_requested() {
                        return;
                    }
                }
            }
        }
    }

    /// One drain / poll / apply iteration
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if self.drain_intake() {
            return self.teardown().await;
        }

        self.resubmit_pending().await;
        self.retry_finish_hooks().await;

        let polled = self.poll_watched().await;

        if self.drain_intake() {
            return self.teardown().await;
        }

        if let Some((targets, mut statuses)) = polled {
            for (job_id, backend_job_id) in targets {
                let status = statuses.remove(&backend_job_id);
                self.apply(job_id, &backend_job_id, status).await;
            }
        }

        CycleOutcome::Continue
    }

    /// Moves everything waiting in the intake into the watch set
    ///
    /// Returns `true` when the loop should stop.
    pub(crate) fn drain_intake(&mut self) -> bool {
        while !self.intake_closed {
            match self.intake.try_recv() {
                Ok(message) => self.accept(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.intake_closed = true,
            }
        }
        self.stop_requested()
    }

    fn stop_requested(&self) -> bool {
        self.shutdown_requested || (self.intake_closed && self.watched.is_empty())
    }

    fn accept(&mut self, message: IntakeMessage) {
        match message {
            IntakeMessage::Watch(record) => {
                debug!("Watching job {} ({:?})", record.job_id, record.backend_job_id);
                self.watched.insert(record.job_id, *record);
            }
            IntakeMessage::Forget(job_id) => {
                if self.watched.remove(&job_id).is_some() {
                    debug!("Forgot job {}", job_id);
                }
            }
            IntakeMessage::Shutdown => self.shutdown_requested = true,
        }
    }

    async fn teardown(&mut self) -> CycleOutcome {
        if !self.watched.is_empty() {
            info!(
                "Shutting down with {} job(s) still watched; recover them on restart",
                self.watched.len()
            );
        }
        self.ctx.adapter.shutdown().await;
        CycleOutcome::Shutdown
    }

    /// Relaunches jobs whose exit code asked for a retry
    async fn resubmit_pending(&mut self) {
        let pending: Vec<JobId> = self
            .watched
            .values()
            .filter(|r| r.resubmit_pending && !r.phase().is_terminal())
            .map(|r| r.job_id)
            .collect();

        for job_id in pending {
            let Some(mut record) = self.watched.remove(&job_id) else {
                continue;
            };
            let keep = self.resubmit(&mut record).await;
            if keep {
                self.watched.insert(job_id, record);
            }
        }
    }

    async fn resubmit(&self, record: &mut JobStateRecord) -> bool {
        let Some(launch) = record.launch.clone() else {
            return !self
                .ctx
                .fail_record(record, "backend asked for a retry but the launch is unknown")
                .await;
        };

        if let Err(e) = record.paths.clear_exit_code().await {
            warn!("Failed to clear exit code of job {}: {}", record.job_id, e);
        }

        match self.ctx.adapter.submit(&launch).await {
            Ok(backend_job_id) => {
                record.resubmits += 1;
                record.resubmit_pending = false;
                record.exit_code = None;
                info!(
                    "Resubmitted job {} as {} (attempt {})",
                    record.job_id,
                    backend_job_id,
                    record.resubmits + 1
                );
                if let Err(e) = record.wrapper.set_external_id(&backend_job_id).await {
                    warn!(
                        "Failed to persist backend id of job {}: {:#}",
                        record.job_id, e
                    );
                }
                record.backend_job_id = Some(backend_job_id);
                true
            }
            Err(e) => {
                let message = format!(
                    "resubmission to the {} backend failed: {}",
                    self.ctx.adapter.name(),
                    e
                );
                !self.ctx.fail_record(record, message).await
            }
        }
    }

    /// Reports terminal records whose finish hook failed earlier
    async fn retry_finish_hooks(&mut self) {
        let unreported: Vec<JobId> = self
            .watched
            .values()
            .filter(|r| r.phase().is_terminal())
            .map(|r| r.job_id)
            .collect();

        for job_id in unreported {
            let Some(record) = self.watched.get(&job_id) else {
                continue;
            };
            match record.wrapper.finish(&record.outcome()).await {
                Ok(()) => {
                    info!("Job {} finished as {} on retry", job_id, record.phase());
                    self.watched.remove(&job_id);
                }
                Err(e) => warn!("Finish hook of job {} failed again: {:#}", job_id, e),
            }
        }
    }

    /// Polls every active job in one adapter call
    ///
    /// `None` when there was nothing to poll or the poll as a whole failed;
    /// in both cases every record stays as it is.
    async fn poll_watched(
        &self,
    ) -> Option<(Vec<(JobId, String)>, HashMap<String, BackendStatus>)> {
        let mut ids = Vec::new();
        let mut targets: Vec<PollTarget> = Vec::new();
        for record in self.watched.values() {
            if record.resubmit_pending || !record.phase().is_active() {
                continue;
            }
            if let Some(target) = record.poll_target() {
                ids.push((record.job_id, target.backend_job_id.clone()));
                targets.push(target);
            }
        }

        if targets.is_empty() {
            return None;
        }

        debug!("Polling {} {} job(s)", targets.len(), self.ctx.adapter.name());
        match self.ctx.adapter.poll(&targets).await {
            Ok(statuses) => Some((ids, statuses)),
            Err(e) => {
                warn!(
                    "Polling {} job(s) on the {} backend failed, retrying next cycle: {}",
                    targets.len(),
                    self.ctx.adapter.name(),
                    e
                );
                None
            }
        }
    }

    async fn apply(&mut self, job_id: JobId, backend_job_id: &str, status: Option<BackendStatus>) {
        // Forgotten or resubmitted since the poll started
        let Some(mut record) = self.watched.remove(&job_id) else {
            return;
        };
        if record.backend_job_id.as_deref() != Some(backend_job_id) {
            self.watched.insert(job_id, record);
            return;
        }

        if record.wrapper.phase().await.is_terminal() {
            debug!("Job {} is terminal upstream; no longer watching it", job_id);
            return;
        }

        let keep = match status {
            None | Some(BackendStatus::Lost) => {
                let message = format!(
                    "job {} was lost: the {} backend no longer knows it",
                    backend_job_id,
                    self.ctx.adapter.name()
                );
                !self.ctx.fail_record(&mut record, message).await
            }
            Some(BackendStatus::CheckFailed(message)) => {
                warn!(
                    "Failed to check job {} ({}), retrying next cycle: {}",
                    job_id, backend_job_id, message
                );
                true
            }
            Some(BackendStatus::Phase(reported)) => self.transition(&mut record, reported).await,
        };

        if keep {
            self.watched.insert(job_id, record);
        }
    }

    /// Applies one reported phase; returns whether the record stays watched
    async fn transition(&self, record: &mut JobStateRecord, reported: BackendPhase) -> bool {
        match reported.phase {
            JobPhase::New => true,
            JobPhase::Queued | JobPhase::Running => {
                if record.phase().can_transition_to(reported.phase) {
                    if let Err(e) = record.wrapper.change_state(reported.phase).await {
                        warn!(
                            "Failed to persist {} for job {}, retrying next cycle: {:#}",
                            reported.phase, record.job_id, e
                        );
                        return true;
                    }
                    record.advance(reported.phase);
                    debug!("Job {} is {}", record.job_id, reported.phase);
                }
                true
            }
            JobPhase::Ok | JobPhase::Error => self.settle(record, reported).await,
            JobPhase::Stopped | JobPhase::Deleted => {
                record.record_failure(
                    reported
                        .reason
                        .unwrap_or_else(|| "job was cancelled outside the dispatcher".to_string()),
                );
                record.stdout = reported.stdout;
                record.stderr = reported.stderr;
                !self.ctx.complete(record, JobPhase::Deleted).await
            }
        }
    }

    /// Finishes a job the backend reports as done, honouring the exit-code policy
    async fn settle(&self, record: &mut JobStateRecord, reported: BackendPhase) -> bool {
        let exit_code = match reported.exit_code {
            Some(code) => Some(code),
            None => read_exit_code(&record.paths.exit_code_file).await,
        };
        record.exit_code = exit_code;

        let policy = self.ctx.adapter.exit_code_policy();
        let phase = match exit_code.map(|code| (code, policy.classify(code))) {
            Some((_, ExitDisposition::Success)) if reported.phase == JobPhase::Ok => JobPhase::Ok,
            Some((code, ExitDisposition::RetryLater)) => {
                if record.resubmits < self.ctx.config.max_resubmits && record.launch.is_some() {
                    info!(
                        "Job {} exited with {}; resubmitting next cycle",
                        record.job_id, code
                    );
                    record.resubmit_pending = true;
                    return true;
                }
                record.record_failure(format!(
                    "exit code {} asked for a retry but all {} resubmissions were used",
                    code, self.ctx.config.max_resubmits
                ));
                JobPhase::Error
            }
            Some((code, _)) => {
                record.record_failure(
                    reported
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("exit code {}", code)),
                );
                JobPhase::Error
            }
            None if reported.phase == JobPhase::Ok => JobPhase::Ok,
            None => {
                record.record_failure(
                    reported
                        .reason
                        .clone()
                        .unwrap_or_else(|| "job failed without an exit code".to_string()),
                );
                JobPhase::Error
            }
        };

        record.stdout = reported.stdout;
        record.stderr = reported.stderr;
        !self.ctx.complete(record, phase).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryJobWrapper, JobWrapper};
    use crate::scheduler::testing::{
        FlakyWrapper, ScriptedBackend, dispatcher_with, finished, job, running,
    };
    use crate::scheduler::Dispatcher;
    use relay_core::ExitCodePolicy;

    async fn submitted(
        dispatcher: &Dispatcher,
        id: JobId,
    ) -> Arc<InMemoryJobWrapper> {
        let wrapper = Arc::new(InMemoryJobWrapper::new(job(id)));
        dispatcher.submit(wrapper.clone()).await.unwrap();
        wrapper
    }

    #[tokio::test]
    async fn test_job_runs_to_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![running(), finished(0, "hello\n")]);

        let wrapper = submitted(&dispatcher, 1).await;

        assert_eq!(monitor.run_cycle().await, CycleOutcome::Continue);
        assert_eq!(wrapper.transitions(), vec![JobPhase::Queued, JobPhase::Running]);
        assert!(wrapper.outcomes().is_empty());

        monitor.run_cycle().await;

        let outcomes = wrapper.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].phase, JobPhase::Ok);
        assert_eq!(outcomes[0].exit_code, Some(0));
        assert!(outcomes[0].fail_message.is_none());

        let stdout = tokio::fs::read_to_string(&outcomes[0].output_file).await.unwrap();
        let stderr = tokio::fs::read_to_string(&outcomes[0].error_file).await.unwrap();
        assert_eq!(stdout, "hello\n");
        assert!(stderr.is_empty());
        assert_eq!(monitor.watched_count(), 0);

        // Nothing left to report
        monitor.run_cycle().await;
        assert_eq!(wrapper.outcomes().len(), 1);
    }

    #[tokio::test]
    async fn test_error_uses_backend_reason() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        let mut failed = BackendPhase::finished(137).with_reason("container killed: out of memory");
        failed.stderr = Some("Killed\n".to_string());
        backend.script("scripted-1", vec![Some(BackendStatus::Phase(failed))]);

        let wrapper = submitted(&dispatcher, 1).await;
        monitor.run_cycle().await;

        let outcome = wrapper.last_outcome().unwrap();
        assert_eq!(outcome.phase, JobPhase::Error);
        assert_eq!(outcome.exit_code, Some(137));
        assert_eq!(
            outcome.fail_message.as_deref(),
            Some("container killed: out of memory")
        );
        let ec = tokio::fs::read_to_string(&outcome.exit_code_file).await.unwrap();
        assert_eq!(ec.trim(), "137");
    }

    #[tokio::test]
    async fn test_lost_job_fails_within_one_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![running(), None]);
        backend.script("scripted-2", vec![Some(BackendStatus::Lost)]);

        let omitted = submitted(&dispatcher, 1).await;
        let reported_lost = submitted(&dispatcher, 2).await;

        monitor.run_cycle().await;
        assert!(omitted.outcomes().is_empty());
        let outcome = reported_lost.last_outcome().unwrap();
        assert_eq!(outcome.phase, JobPhase::Error);
        assert!(outcome.fail_message.unwrap().contains("lost"));

        monitor.run_cycle().await;
        let outcome = omitted.last_outcome().unwrap();
        assert_eq!(outcome.phase, JobPhase::Error);
        assert!(outcome.fail_message.unwrap().contains("lost"));
        assert_eq!(monitor.watched_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_failure_keeps_jobs_watched() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![finished(0, "done\n")]);
        let wrapper = submitted(&dispatcher, 1).await;

        backend.set_failing_polls(true);
        monitor.run_cycle().await;
        assert!(monitor.is_watching(1));
        assert!(wrapper.outcomes().is_empty());

        backend.set_failing_polls(false);
        monitor.run_cycle().await;
        assert_eq!(wrapper.last_outcome().unwrap().phase, JobPhase::Ok);
    }

    #[tokio::test]
    async fn test_check_failure_does_not_block_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script(
            "scripted-1",
            vec![
                Some(BackendStatus::CheckFailed("timeout".to_string())),
                running(),
            ],
        );
        backend.script("scripted-2", vec![finished(0, "")]);

        let flaky = submitted(&dispatcher, 1).await;
        let healthy = submitted(&dispatcher, 2).await;

        monitor.run_cycle().await;

        assert_eq!(backend.polled(), vec![2]);
        assert_eq!(flaky.transitions(), vec![JobPhase::Queued]);
        assert!(monitor.is_watching(1));
        assert_eq!(healthy.last_outcome().unwrap().phase, JobPhase::Ok);

        monitor.run_cycle().await;
        assert_eq!(flaky.transitions(), vec![JobPhase::Queued, JobPhase::Running]);
    }

    #[tokio::test]
    async fn test_stop_is_not_overwritten_by_late_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![running(), finished(1, "")]);

        let wrapper = submitted(&dispatcher, 1).await;
        monitor.run_cycle().await;

        dispatcher.stop(wrapper.clone()).await.unwrap();
        monitor.run_cycle().await;
        monitor.run_cycle().await;

        assert_eq!(wrapper.snapshot().phase, JobPhase::Deleted);
        assert!(wrapper.outcomes().is_empty());
        assert_eq!(
            wrapper.transitions(),
            vec![JobPhase::Queued, JobPhase::Running, JobPhase::Deleted]
        );
        assert_eq!(monitor.watched_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_between_poll_and_apply_wins() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![finished(1, "")]);

        let wrapper = submitted(&dispatcher, 1).await;
        monitor.drain_intake();

        // Persisted DELETED while the ERROR result is still in flight
        wrapper.change_state(JobPhase::Deleted).await.unwrap();
        monitor.run_cycle().await;

        assert_eq!(wrapper.snapshot().phase, JobPhase::Deleted);
        assert!(wrapper.outcomes().is_empty());
        assert_eq!(monitor.watched_count(), 0);
    }

    #[tokio::test]
    async fn test_external_cancellation_finishes_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script(
            "scripted-1",
            vec![Some(BackendStatus::Phase(BackendPhase::new(JobPhase::Stopped)))],
        );

        let wrapper = submitted(&dispatcher, 1).await;
        monitor.run_cycle().await;

        let outcome = wrapper.last_outcome().unwrap();
        assert_eq!(outcome.phase, JobPhase::Deleted);
        assert!(outcome.fail_message.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_retry_later_exit_code_resubmits() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            Arc::new(ScriptedBackend::new().with_policy(ExitCodePolicy::with_retry_code(255)));
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![running(), finished(255, "")]);
        backend.script("scripted-1-2", vec![finished(0, "second try\n")]);

        let wrapper = submitted(&dispatcher, 1).await;
        monitor.run_cycle().await;
        monitor.run_cycle().await;

        assert!(monitor.is_watching(1));
        assert!(wrapper.outcomes().is_empty());
        assert_eq!(backend.submissions(), 1);

        monitor.run_cycle().await;
        assert_eq!(backend.submissions(), 2);
        assert_eq!(wrapper.snapshot().external_id.as_deref(), Some("scripted-1-2"));

        let outcome = wrapper.last_outcome().unwrap();
        assert_eq!(outcome.phase, JobPhase::Ok);
        // Phase never went backwards across the resubmission
        assert_eq!(
            wrapper.transitions(),
            vec![JobPhase::Queued, JobPhase::Running, JobPhase::Ok]
        );
    }

    #[tokio::test]
    async fn test_retry_later_gives_up_after_max_resubmits() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            Arc::new(ScriptedBackend::new().with_policy(ExitCodePolicy::with_retry_code(255)));
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![finished(255, "")]);
        for n in 2..=4 {
            backend.script(&format!("scripted-1-{}", n), vec![finished(255, "")]);
        }

        let wrapper = submitted(&dispatcher, 1).await;
        for _ in 0..8 {
            monitor.run_cycle().await;
        }

        assert_eq!(backend.submissions(), 4);
        let outcome = wrapper.last_outcome().unwrap();
        assert_eq!(outcome.phase, JobPhase::Error);
        assert!(outcome.fail_message.unwrap().contains("exit code 255"));
        assert_eq!(monitor.watched_count(), 0);
    }

    #[tokio::test]
    async fn test_finish_hook_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![finished(0, "ok\n")]);

        let wrapper = Arc::new(FlakyWrapper::new(job(1), 1));
        dispatcher.submit(wrapper.clone()).await.unwrap();

        monitor.run_cycle().await;
        assert!(monitor.is_watching(1));
        assert!(wrapper.inner.outcomes().is_empty());

        monitor.run_cycle().await;
        assert_eq!(wrapper.inner.outcomes().len(), 1);
        assert_eq!(wrapper.inner.last_outcome().unwrap().phase, JobPhase::Ok);
        assert_eq!(monitor.watched_count(), 0);
        // Not polled again once terminal
        assert_eq!(backend.polled(), vec![1]);
    }

    #[tokio::test]
    async fn test_shutdown_sentinel_stops_loop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, mut monitor) = dispatcher_with(dir.path(), backend.clone());

        let wrapper = submitted(&dispatcher, 1).await;
        dispatcher.shutdown().await.unwrap();

        assert_eq!(monitor.run_cycle().await, CycleOutcome::Shutdown);
        assert_eq!(backend.shutdowns(), 1);
        assert!(backend.polled().is_empty());
        // Left QUEUED for recovery
        assert_eq!(wrapper.snapshot().phase, JobPhase::Queued);
    }

    #[tokio::test]
    async fn test_run_exits_when_handles_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (dispatcher, monitor) = dispatcher_with(dir.path(), backend.clone());
        backend.script("scripted-1", vec![running(), finished(0, "x\n")]);

        let wrapper = submitted(&dispatcher, 1).await;
        drop(dispatcher);

        tokio::time::timeout(Duration::from_secs(5), monitor.run())
            .await
            .unwrap();

        assert_eq!(wrapper.last_outcome().unwrap().phase, JobPhase::Ok);
        assert_eq!(backend.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_spawned_monitor_wakes_for_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let config = crate::config::DispatcherConfig::new(
            crate::config::BackendKind::Local,
            dir.path().to_path_buf(),
        )
        .with_poll_interval(Duration::from_secs(3600));
        let (dispatcher, handle) = Dispatcher::spawn(
            config,
            backend.clone(),
            Arc::new(crate::service::composer::PassthroughComposer),
        );

        dispatcher.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(backend.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_interval_respects_backend_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new());
        let (_dispatcher, monitor) = dispatcher_with(dir.path(), backend);
        assert_eq!(monitor.interval(), Duration::from_millis(10));
    }
}
