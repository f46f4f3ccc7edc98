//! Configuration module
//!
//! Command-line overrides layered on top of the dispatcher's environment
//! configuration.

use anyhow::Result;
use relay_dispatcher::{BackendKind, DispatcherConfig};
use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub backend: Option<BackendKind>,
    pub working_dir: Option<PathBuf>,
    /// Seconds
    pub poll_interval: Option<u64>,
}

impl Config {
    /// Dispatcher configuration from the environment plus these overrides
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig> {
        let mut config = DispatcherConfig::from_env()?;

        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(dir) = &self.working_dir {
            config.working_dir = dir.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}
