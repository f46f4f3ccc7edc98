//! Fakes shared by the dispatch tests

use async_trait::async_trait;
use relay_core::{
    DestinationSchema, ExitCodePolicy, Job, JobId, JobOutcome, JobPhase, ParamKind, ParamSpec,
    ParamValue,
};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Dispatcher, Monitor};
use crate::backend::{BackendAdapter, BackendPhase, BackendStatus, LaunchRequest, PollTarget};
use crate::config::{BackendKind, DispatcherConfig};
use crate::error::BackendError;
use crate::repository::{InMemoryJobWrapper, JobWrapper};
use crate::service::composer::PassthroughComposer;

/// Backend replaying scripted statuses per backend id
///
/// Each poll consumes the next scripted entry; the last one repeats. `None`
/// leaves the id out of the poll result. Unscripted ids report QUEUED.
pub struct ScriptedBackend {
    schema: DestinationSchema,
    policy: ExitCodePolicy,
    scripts: Mutex<HashMap<String, VecDeque<Option<BackendStatus>>>>,
    launches: Mutex<HashMap<JobId, u32>>,
    submissions: AtomicUsize,
    cancellations: AtomicUsize,
    polled: Mutex<Vec<usize>>,
    shutdowns: AtomicUsize,
    fail_polls: AtomicBool,
    refuse_submit: bool,
    refuse_cancel: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            schema: DestinationSchema::new(vec![
                ParamSpec::with_default("vcpu", ParamKind::Float, ParamValue::Float(1.0)),
                ParamSpec::with_default("memory", ParamKind::MemoryMb, ParamValue::Int(2048)),
            ]),
            policy: ExitCodePolicy::strict(),
            scripts: Mutex::new(HashMap::new()),
            launches: Mutex::new(HashMap::new()),
            submissions: AtomicUsize::new(0),
            cancellations: AtomicUsize::new(0),
            polled: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            fail_polls: AtomicBool::new(false),
            refuse_submit: false,
            refuse_cancel: false,
        }
    }

    pub fn refusing_submissions(mut self) -> Self {
        self.refuse_submit = true;
        self
    }

    pub fn refusing_cancellations(mut self) -> Self {
        self.refuse_cancel = true;
        self
    }

    pub fn with_policy(mut self, policy: ExitCodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn script(&self, backend_job_id: &str, statuses: Vec<Option<BackendStatus>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(backend_job_id.to_string(), statuses.into());
    }

    pub fn set_failing_polls(&self, failing: bool) {
        self.fail_polls.store(failing, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Number of targets passed to each poll call
    pub fn polled(&self) -> Vec<usize> {
        self.polled.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn destination_schema(&self) -> &DestinationSchema {
        &self.schema
    }

    fn exit_code_policy(&self) -> ExitCodePolicy {
        self.policy.clone()
    }

    fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn submit(&self, launch: &LaunchRequest) -> Result<String, BackendError> {
        if self.refuse_submit {
            return Err(BackendError::Process("queue is closed".to_string()));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let mut launches = self.launches.lock().unwrap();
        let count = launches.entry(launch.job_id).or_insert(0);
        *count += 1;
        Ok(match *count {
            1 => format!("scripted-{}", launch.job_id),
            n => format!("scripted-{}-{}", launch.job_id, n),
        })
    }

    async fn poll(
        &self,
        targets: &[PollTarget],
    ) -> Result<HashMap<String, BackendStatus>, BackendError> {
        self.polled.lock().unwrap().push(targets.len());
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(BackendError::Protocol("status service unavailable".to_string()));
        }

        let mut scripts = self.scripts.lock().unwrap();
        let mut statuses = HashMap::new();
        for target in targets {
            let next = match scripts.get_mut(&target.backend_job_id) {
                Some(script) if script.len() > 1 => script.pop_front().flatten(),
                Some(script) => script.front().cloned().flatten(),
                None => Some(BackendStatus::Phase(BackendPhase::new(JobPhase::Queued))),
            };
            if let Some(status) = next {
                statuses.insert(target.backend_job_id.clone(), status);
            }
        }
        Ok(statuses)
    }

    async fn cancel(&self, _backend_job_id: &str) -> Result<(), BackendError> {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        if self.refuse_cancel {
            return Err(BackendError::Process("cancel timed out".to_string()));
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wrapper whose finish hook fails a given number of times first
pub struct FlakyWrapper {
    pub inner: InMemoryJobWrapper,
    failures_left: AtomicUsize,
}

impl FlakyWrapper {
    pub fn new(job: Job, failures: usize) -> Self {
        Self {
            inner: InMemoryJobWrapper::new(job),
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl JobWrapper for FlakyWrapper {
    fn job(&self) -> &Job {
        self.inner.job()
    }

    async fn external_id(&self) -> Option<String> {
        self.inner.external_id().await
    }

    async fn phase(&self) -> JobPhase {
        self.inner.phase().await
    }

    async fn change_state(&self, phase: JobPhase) -> anyhow::Result<()> {
        self.inner.change_state(phase).await
    }

    async fn set_external_id(&self, external_id: &str) -> anyhow::Result<()> {
        self.inner.set_external_id(external_id).await
    }

    async fn finish(&self, outcome: &JobOutcome) -> anyhow::Result<()> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("database is locked");
        }
        self.inner.finish(outcome).await
    }
}

pub fn running() -> Option<BackendStatus> {
    Some(BackendStatus::Phase(BackendPhase::new(JobPhase::Running)))
}

pub fn finished(code: i32, stdout: &str) -> Option<BackendStatus> {
    let mut phase = BackendPhase::finished(code);
    phase.stdout = Some(stdout.to_string());
    Some(BackendStatus::Phase(phase))
}

pub fn job(id: JobId) -> Job {
    Job::new(id, "cat1", "1.0")
        .with_param("vcpu", "1")
        .with_param("memory", "2048")
        .with_command("cat input.txt")
}

pub fn dispatcher_with(dir: &Path, backend: Arc<ScriptedBackend>) -> (Dispatcher, Monitor) {
    let config = DispatcherConfig::new(BackendKind::Local, dir.to_path_buf())
        .with_poll_interval(Duration::from_millis(10));
    Dispatcher::new(config, backend, Arc::new(PassthroughComposer))
}
