//! Repository layer
//!
//! The dispatcher never talks to storage directly. Persisted jobs reach it
//! through the [`JobWrapper`] trait, implemented by whoever owns the jobs.

mod job_wrapper;

pub use job_wrapper::{InMemoryJobWrapper, JobWrapper};
