//! Data Transfer Objects
//!
//! Wire representations used when talking to external services. Domain
//! types stay in [`crate::domain`]; these only exist on the wire.

pub mod batch;
