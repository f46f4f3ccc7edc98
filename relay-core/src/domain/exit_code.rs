//! Exit-code policy
//!
//! Backends disagree on what a non-zero exit code means: some treat every
//! non-zero code as a failure, others reserve a code to ask for the job to be
//! requeued. Each backend adapter declares its own policy.

use serde::{Deserialize, Serialize};

/// How a finished job's exit code is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Success,
    Failure,
    RetryLater,
}

/// Exit codes with a special meaning for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCodePolicy {
    pub success: Vec<i32>,
    pub retry_later: Vec<i32>,
}

impl ExitCodePolicy {
    /// Zero succeeds, everything else fails
    pub fn strict() -> Self {
        Self {
            success: vec![0],
            retry_later: Vec::new(),
        }
    }

    /// Strict policy plus one code that requests a resubmission
    pub fn with_retry_code(code: i32) -> Self {
        Self {
            success: vec![0],
            retry_later: vec![code],
        }
    }

    pub fn classify(&self, exit_code: i32) -> ExitDisposition {
        if self.success.contains(&exit_code) {
            ExitDisposition::Success
        } else if self.retry_later.contains(&exit_code) {
            ExitDisposition::RetryLater
        } else {
            ExitDisposition::Failure
        }
    }
}

impl Default for ExitCodePolicy {
    fn default() -> Self {
        Self::strict()
    }
}
