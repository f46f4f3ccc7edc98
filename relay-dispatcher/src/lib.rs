//! Relay Dispatcher
//!
//! Hands jobs to an execution backend, watches them until they finish and
//! reports every outcome through one finish hook. Backends are pluggable:
//! local processes, a cluster scheduler or a cloud batch service, all behind
//! the same [`BackendAdapter`] contract.
//!
//! # Example
//!
//! ```no_run
//! use relay_core::Job;
//! use relay_dispatcher::{
//!     BackendKind, Dispatcher, DispatcherConfig, InMemoryJobWrapper, PassthroughComposer,
//!     build_backend,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DispatcherConfig::new(BackendKind::Local, "/tmp/relay".into());
//! let backend = build_backend(&config);
//! let (dispatcher, monitor) = Dispatcher::spawn(config, backend, Arc::new(PassthroughComposer));
//!
//! let job = Job::new(1, "cat1", "1.0").with_command("echo hello");
//! dispatcher.submit(Arc::new(InMemoryJobWrapper::new(job))).await?;
//!
//! dispatcher.shutdown().await?;
//! monitor.await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod state;

pub use backend::{
    BackendAdapter, BackendPhase, BackendStatus, LaunchRequest, PollTarget, build_backend,
};
pub use config::{BackendKind, BatchSettings, DispatcherConfig, SchedulerSettings};
pub use error::{BackendError, DispatchError};
pub use repository::{InMemoryJobWrapper, JobWrapper};
pub use scheduler::{CycleOutcome, Dispatcher, Monitor, Recovered, RecoverySummary, recover_jobs};
pub use service::{CommandComposer, ComposedCommand, PassthroughComposer};
pub use state::{JobPaths, JobStateRecord};
