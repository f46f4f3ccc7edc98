//! Service layer
//!
//! Collaborators the dispatcher consumes: command composition, and the job
//! definition cache batch-style backends put in front of their registry.

pub mod composer;
pub mod definitions;

pub use composer::{CommandComposer, ComposedCommand, PassthroughComposer};
pub use definitions::{DefinitionStore, JobDefinitionCache};
