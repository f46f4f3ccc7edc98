//! Dispatch layer
//!
//! A [`Dispatcher`] is the handle callers use to submit, stop and recover
//! jobs; the [`Monitor`] owns the watch set and drives every watched job to a
//! terminal phase. The two only share an intake channel, so the watch set is
//! never locked.

mod dispatcher;
mod lifecycle;
mod monitor;
pub mod recovery;

#[cfg(test)]
mod testing;

pub use dispatcher::{Dispatcher, Recovered};
pub use monitor::{CycleOutcome, Monitor};
pub use recovery::{RecoverySummary, recover_jobs};

use relay_core::JobId;

use crate::state::JobStateRecord;

/// Messages from dispatcher handles to the monitor
#[derive(Debug)]
pub(crate) enum IntakeMessage {
    /// Start watching a submitted or recovered job
    Watch(Box<JobStateRecord>),
    /// Stop watching a job without reporting anything
    Forget(JobId),
    /// Tear the backend down and exit the loop
    Shutdown,
}
