//! Core domain types
//!
//! This module contains the core structures shared by the dispatcher, its
//! backend adapters and the CLI: the job phase state machine, destination
//! parameters, job definition keys and exit-code policies.

pub mod definition;
pub mod destination;
pub mod exit_code;
pub mod job;
pub mod phase;
