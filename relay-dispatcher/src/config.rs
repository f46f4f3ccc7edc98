//! Dispatcher configuration
//!
//! Defines all configurable parameters for a dispatcher instance including
//! the backend selection, polling interval, intake bound and backend-specific
//! connection settings.

use std::path::PathBuf;
use std::time::Duration;

/// Which backend adapter a dispatcher drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Scheduler,
    Batch,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "scheduler" | "cluster" => Ok(BackendKind::Scheduler),
            "batch" | "cloud" => Ok(BackendKind::Batch),
            other => anyhow::bail!("unknown backend '{}'", other),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Scheduler => write!(f, "scheduler"),
            BackendKind::Batch => write!(f, "batch"),
        }
    }
}

/// Cluster scheduler command lines
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Submits a script path, prints the job id (e.g., "sbatch --parsable")
    pub submit_command: String,
    /// Prints `<id> <state>` lines for the ids appended as one comma list
    pub status_command: String,
    /// Cancels the id appended to it
    pub cancel_command: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            submit_command: "sbatch --parsable".to_string(),
            status_command: "squeue -h -o \"%i %t\" -j".to_string(),
            cancel_command: "scancel".to_string(),
        }
    }
}

/// Cloud batch service settings
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Base URL of the batch service
    pub url: String,
    /// Per-call cap on `describe_jobs`
    pub max_describe: usize,
    /// Log group holding container output
    pub log_group: String,
    /// Image used when the destination does not name one
    pub default_image: String,
    /// Role attached to registered definitions
    pub job_role_arn: Option<String>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:4566".to_string(),
            max_describe: relay_batch::MAX_DESCRIBE_JOBS,
            log_group: "/aws/batch/job".to_string(),
            default_image: "public.ecr.aws/docker/library/busybox:latest".to_string(),
            job_role_arn: None,
        }
    }
}

/// Dispatcher configuration
///
/// All intervals are configurable to allow tuning for different deployment
/// scenarios; the effective poll interval is never shorter than the
/// backend's own minimum.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Backend this dispatcher drives
    pub backend: BackendKind,

    /// Base directory; each job gets `<working_dir>/<job_id>`
    pub working_dir: PathBuf,

    /// Minimum time between two monitor iterations
    pub poll_interval: Duration,

    /// Bound of the intake channel between callers and the monitor
    pub intake_capacity: usize,

    /// Backend job names are `<prefix>_<job_id>`
    pub job_name_prefix: String,

    /// How often a "retry later" exit code may requeue the same job
    pub max_resubmits: u32,

    pub scheduler: SchedulerSettings,

    pub batch: BatchSettings,
}

impl DispatcherConfig {
    /// Creates a new configuration with defaults
    pub fn new(backend: BackendKind, working_dir: PathBuf) -> Self {
        Self {
            backend,
            working_dir,
            poll_interval: Duration::from_secs(5),
            intake_capacity: 1024,
            job_name_prefix: "relay".to_string(),
            max_resubmits: 3,
            scheduler: SchedulerSettings::default(),
            batch: BatchSettings::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - RELAY_BACKEND (default: local)
    /// - RELAY_WORKING_DIR (default: <tmp>/relay)
    /// - RELAY_POLL_INTERVAL (seconds, default: 5)
    /// - RELAY_INTAKE_CAPACITY (default: 1024)
    /// - RELAY_JOB_NAME_PREFIX (default: relay)
    /// - RELAY_MAX_RESUBMITS (default: 3)
    /// - RELAY_SCHEDULER_SUBMIT / RELAY_SCHEDULER_STATUS / RELAY_SCHEDULER_CANCEL
    /// - RELAY_BATCH_URL (default: http://localhost:4566)
    /// - RELAY_BATCH_MAX_DESCRIBE (default: 100)
    /// - RELAY_BATCH_LOG_GROUP (default: /aws/batch/job)
    /// - RELAY_BATCH_IMAGE, RELAY_BATCH_JOB_ROLE
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("RELAY_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => BackendKind::Local,
        };

        let working_dir = std::env::var("RELAY_WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_working_dir());

        let mut config = Self::new(backend, working_dir);

        if let Some(secs) = env_parse::<u64>("RELAY_POLL_INTERVAL") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = env_parse::<usize>("RELAY_INTAKE_CAPACITY") {
            config.intake_capacity = capacity;
        }
        if let Ok(prefix) = std::env::var("RELAY_JOB_NAME_PREFIX") {
            config.job_name_prefix = prefix;
        }
        if let Some(max) = env_parse::<u32>("RELAY_MAX_RESUBMITS") {
            config.max_resubmits = max;
        }

        if let Ok(cmd) = std::env::var("RELAY_SCHEDULER_SUBMIT") {
            config.scheduler.submit_command = cmd;
        }
        if let Ok(cmd) = std::env::var("RELAY_SCHEDULER_STATUS") {
            config.scheduler.status_command = cmd;
        }
        if let Ok(cmd) = std::env::var("RELAY_SCHEDULER_CANCEL") {
            config.scheduler.cancel_command = cmd;
        }

        if let Ok(url) = std::env::var("RELAY_BATCH_URL") {
            config.batch.url = url;
        }
        if let Some(max) = env_parse::<usize>("RELAY_BATCH_MAX_DESCRIBE") {
            config.batch.max_describe = max;
        }
        if let Ok(group) = std::env::var("RELAY_BATCH_LOG_GROUP") {
            config.batch.log_group = group;
        }
        if let Ok(image) = std::env::var("RELAY_BATCH_IMAGE") {
            config.batch.default_image = image;
        }
        config.batch.job_role_arn = std::env::var("RELAY_BATCH_JOB_ROLE").ok();

        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch(mut self, batch: BatchSettings) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerSettings) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.working_dir.as_os_str().is_empty() {
            anyhow::bail!("working_dir cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.intake_capacity == 0 {
            anyhow::bail!("intake_capacity must be greater than 0");
        }

        if self.job_name_prefix.is_empty()
            || !self
                .job_name_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("job_name_prefix must be non-empty and use only [A-Za-z0-9_-]");
        }

        match self.backend {
            BackendKind::Batch => {
                if !self.batch.url.starts_with("http://") && !self.batch.url.starts_with("https://")
                {
                    anyhow::bail!("batch url must start with http:// or https://");
                }
                if self.batch.max_describe == 0
                    || self.batch.max_describe > relay_batch::MAX_DESCRIBE_JOBS
                {
                    anyhow::bail!(
                        "batch max_describe must be between 1 and {}",
                        relay_batch::MAX_DESCRIBE_JOBS
                    );
                }
            }
            BackendKind::Scheduler => {
                if self.scheduler.submit_command.trim().is_empty()
                    || self.scheduler.status_command.trim().is_empty()
                    || self.scheduler.cancel_command.trim().is_empty()
                {
                    anyhow::bail!("scheduler commands cannot be empty");
                }
            }
            BackendKind::Local => {}
        }

        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new(BackendKind::Local, default_working_dir())
    }
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir().join("relay")
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.intake_capacity, 1024);
        assert_eq!(config.batch.max_describe, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = DispatcherConfig::default();
        assert!(config.validate().is_ok());

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.poll_interval = Duration::from_secs(1);

        config.job_name_prefix = "bad prefix".to_string();
        assert!(config.validate().is_err());
        config.job_name_prefix = "relay".to_string();

        config.backend = BackendKind::Batch;
        config.batch.url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.batch.url = "https://batch.example.org".to_string();
        config.batch.max_describe = 500;
        assert!(config.validate().is_err());

        config.batch.max_describe = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert_eq!("Batch".parse::<BackendKind>().unwrap(), BackendKind::Batch);
        assert_eq!(
            "cluster".parse::<BackendKind>().unwrap(),
            BackendKind::Scheduler
        );
        assert!("k8s".parse::<BackendKind>().is_err());
    }
}
