//! Job domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::phase::JobPhase;

/// Internal job identifier assigned by the persistence layer
pub type JobId = u64;

/// A job as handed to the dispatcher
///
/// Structure shared between the persistence collaborator (owns it) and the
/// dispatcher (reads it, never stores it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tool_id: String,
    pub tool_version: String,
    /// Raw destination values; coerced against the backend's schema at submit
    #[serde(default)]
    pub destination: BTreeMap<String, String>,
    /// Literal command line, for jobs that bypass command composition
    #[serde(default)]
    pub command_line: Option<String>,
    pub phase: JobPhase,
    /// Backend identifier recorded by a previous dispatcher run
    #[serde(default)]
    pub external_id: Option<String>,
}

impl Job {
    pub fn new(id: JobId, tool_id: impl Into<String>, tool_version: impl Into<String>) -> Self {
        Self {
            id,
            tool_id: tool_id.into(),
            tool_version: tool_version.into(),
            destination: BTreeMap::new(),
            command_line: None,
            phase: JobPhase::New,
            external_id: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.destination.insert(key.into(), value.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command_line = Some(command.into());
        self
    }
}

/// What the dispatcher reports upstream once a job leaves the watch set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub phase: JobPhase,
    pub exit_code: Option<i32>,
    pub fail_message: Option<String>,
    pub output_file: std::path::PathBuf,
    pub error_file: std::path::PathBuf,
    pub exit_code_file: std::path::PathBuf,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.phase == JobPhase::Ok
    }
}
