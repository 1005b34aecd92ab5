//! Keel reconcile: converge managed resources toward their desired state.
//!
//! [`ResourceReconciler`] drives one object through create, patch, delete or
//! delete-and-recreate. Component reconcilers derive the desired objects of one
//! kind from an `AdvDeployment` and run in a fixed order through
//! [`run_components`].

#![forbid(unsafe_code)]

pub mod component;
pub mod error;
pub mod kind;
pub mod labels;
pub mod resource;
pub mod service;
pub mod workload;

pub use component::{run_components, ComponentReconciler};
pub use error::ReconcileError;
pub use kind::ManagedResource;
pub use resource::{ResourceOutcome, ResourceReconciler};
pub use service::ServiceReconciler;
pub use workload::WorkloadReconciler;
