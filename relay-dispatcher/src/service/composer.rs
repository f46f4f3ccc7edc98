//! Command composition
//!
//! Turning tool metadata into a command line lives outside the dispatcher;
//! this trait is the boundary. The composed command is handed to the backend
//! adapter unmodified.

use anyhow::Result;
use relay_core::Job;
use std::path::PathBuf;

use crate::state::JobPaths;

/// A runnable command for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedCommand {
    /// Literal command line, run through `/bin/sh -c` by shell-based backends
    pub command: String,
    /// Script that must succeed before the command runs (dependency chains)
    pub precheck_script: Option<PathBuf>,
}

impl ComposedCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            precheck_script: None,
        }
    }
}

/// Builds the command a backend will run
///
/// Implementations must not have shell side effects of their own.
pub trait CommandComposer: Send + Sync {
    fn compose(&self, job: &Job, paths: &JobPaths) -> Result<ComposedCommand>;
}

/// Composer for jobs that already carry a literal command line
#[derive(Debug, Default, Clone)]
pub struct PassthroughComposer;

impl CommandComposer for PassthroughComposer {
    fn compose(&self, job: &Job, _paths: &JobPaths) -> Result<ComposedCommand> {
        match job.command_line.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => Ok(ComposedCommand::new(command)),
            _ => anyhow::bail!("job {} has no command line", job.id),
        }
    }
}
