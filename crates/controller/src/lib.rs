//! Keel controller: reconcile cycles for `AdvDeployment` objects and the queue that schedules them.

#![forbid(unsafe_code)]

pub mod controller;
pub mod queue;
pub mod status;

pub use controller::{Controller, ReconcileOutcome};
pub use queue::{spawn_runner, WorkQueue};
