//! Launchpad Control
//!
//! Provisions a complete, publicly reachable task manager instance from a
//! single request: a subdomain label, a contact email and an administrator
//! email.
//!
//! # Pipeline
//!
//! The [`Orchestrator`] drives five collaborators in a fixed order:
//!
//! 1. **Availability**: the subdomain must not already resolve
//! 2. **Compute**: create a virtual machine
//! 3. **DNS**: point `<subdomain>.<base domain>` at the machine's address
//! 4. **Deploy**: install the application and serve the domain
//! 5. **Notify**: email the contact that the instance is live
//!
//! The first four are fatal on failure. A failed notification leaves the
//! deployment successful with a warning. When a fatal step fails, completed
//! steps are undone in reverse order unless
//! `orchestrator.compensate_on_failure` is off.
//!
//! # State Machine
//!
//! ```text
//! Pending ──▶ CheckingAvailability ──▶ Provisioning ──▶ RegisteringDns ──▶ Deploying ──▶ Notifying ──▶ Succeeded
//!    │                 │                    │                 │                │
//!    └─────────────────┴────────────────────┴─────────────────┴────────────────┴──────────▶ Failed(step)
//! ```
//!
//! Transitions are checked at runtime; see [`state`].
//!
//! # Example
//!
//! ```no_run
//! use launchpad_control::{
//!     collaborators::MockCollaborators, DeploymentRequest, LaunchpadConfig, Orchestrator,
//! };
//!
//! # async fn example() {
//! let mocks = MockCollaborators::default();
//! let orchestrator = Orchestrator::new(mocks.collaborators(), &LaunchpadConfig::default());
//!
//! let state = orchestrator
//!     .run(DeploymentRequest::new("demo1", "a@b.com", "c@d.com"))
//!     .await;
//! assert!(state.result().success);
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod collaborators;
pub mod config;
pub mod deployment;
pub mod error;
pub mod progress;
pub mod service;
pub mod state;
pub mod types;

// Re-export commonly used types at the crate root
pub use collaborators::{create_collaborators, Collaborators};
pub use config::LaunchpadConfig;
pub use deployment::{DeploymentTracker, Orchestrator};
pub use error::{CollaboratorError, ControlError, ControlResult, ErrorKind, StepError};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressSink};
pub use service::ControlService;
pub use state::{DeploymentResult, DeploymentState, Outcome, Step};
pub use types::{DeploymentId, DeploymentRequest, ProvisionedResource, Subdomain};
