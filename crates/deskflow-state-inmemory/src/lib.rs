//!
//! Deskflow State In-Memory - in-process state store for the Deskflow engine
//!
//! Implements the engine's storage and wake-timer collaborator traits over
//! concurrent in-memory maps. Suitable for tests, local development, and
//! single-process deployments; everything is lost on restart.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod repositories;
mod timers;

pub use repositories::{InMemoryRunRepository, InMemoryWorkflowRepository};
pub use timers::InMemoryWakeTimer;
