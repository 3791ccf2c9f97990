//! Deployment orchestration.
//!
//! The [`Orchestrator`] walks a request through availability check,
//! provisioning, DNS, application deployment and notification, undoing
//! completed steps when a later one fails.

mod compensation;
mod orchestrator;
mod tracker;

pub use orchestrator::Orchestrator;
pub use tracker::{DeploymentSnapshot, DeploymentTracker, InFlightGuard};
