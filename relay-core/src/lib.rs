//! Relay Core
//!
//! Core types and abstractions for the Relay job dispatcher.
//!
//! This crate contains:
//! - Domain types: jobs, phases, destination parameters, definition keys
//! - DTOs: wire types for the cloud batch-compute API

pub mod domain;
pub mod dto;

pub use domain::definition::DefinitionKey;
pub use domain::destination::{
    DestinationParams, DestinationSchema, ParamKind, ParamSpec, ParamValue, ValidationError,
};
pub use domain::exit_code::{ExitCodePolicy, ExitDisposition};
pub use domain::job::{Job, JobId, JobOutcome};
pub use domain::phase::JobPhase;
