//! Deployment state machine.
//!
//! ```text
//! Pending ──▶ CheckingAvailability ──▶ Provisioning ──▶ RegisteringDns ──▶ Deploying ──▶ Notifying ──▶ Succeeded
//!    │                 │                    │                 │                │
//!    └─────────────────┴────────────────────┴─────────────────┴────────────────┴──────────▶ Failed(step)
//! ```
//!
//! The step only moves forward, one position at a time, and the outcome is
//! written exactly once. Both rules are checked at runtime and violations are
//! reported as [`ControlError::InvalidStateTransition`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult, ErrorKind, StepError};
use crate::types::{DeploymentId, ProvisionedResource};

/// Position of a deployment in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Accepted, nothing attempted yet.
    Pending,
    /// Checking that the subdomain does not already resolve.
    CheckingAvailability,
    /// Creating the compute instance.
    Provisioning,
    /// Publishing the DNS record.
    RegisteringDns,
    /// Deploying application code onto the instance.
    Deploying,
    /// Sending the completion notice.
    Notifying,
}

impl Step {
    /// Steps that call out to a collaborator, in execution order.
    pub const PIPELINE: [Self; 5] = [
        Self::CheckingAvailability,
        Self::Provisioning,
        Self::RegisteringDns,
        Self::Deploying,
        Self::Notifying,
    ];

    /// Zero-based position, `Pending` being 0.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Pending => 0,
            Self::CheckingAvailability => 1,
            Self::Provisioning => 2,
            Self::RegisteringDns => 3,
            Self::Deploying => 4,
            Self::Notifying => 5,
        }
    }

    /// The step that follows this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::CheckingAvailability),
            Self::CheckingAvailability => Some(Self::Provisioning),
            Self::Provisioning => Some(Self::RegisteringDns),
            Self::RegisteringDns => Some(Self::Deploying),
            Self::Deploying => Some(Self::Notifying),
            Self::Notifying => None,
        }
    }

    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::CheckingAvailability => "checking_availability",
            Self::Provisioning => "provisioning",
            Self::RegisteringDns => "registering_dns",
            Self::Deploying => "deploying",
            Self::Notifying => "notifying",
        }
    }

    /// Name of the operation performed in this step, as reported to callers.
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::Pending => "ValidateRequest",
            Self::CheckingAvailability => "CheckAvailability",
            Self::Provisioning => "ProvisionInstance",
            Self::RegisteringDns => "RegisterDns",
            Self::Deploying => "DeployApplication",
            Self::Notifying => "Notify",
        }
    }

    /// Human-readable label for progress displays.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Waiting to start",
            Self::CheckingAvailability => "Verifying subdomain name",
            Self::Provisioning => "Creating new instance",
            Self::RegisteringDns => "Registering DNS record",
            Self::Deploying => "Deploying to subdomain",
            Self::Notifying => "Sending notification email",
        }
    }

    /// Kind assigned when the collaborator behind this step rejects a call.
    #[must_use]
    pub const fn failure_kind(self) -> ErrorKind {
        match self {
            Self::Pending => ErrorKind::InvalidSubdomain,
            Self::CheckingAvailability => ErrorKind::AlreadyInUse,
            Self::Provisioning => ErrorKind::ProvisioningFailed,
            Self::RegisteringDns => ErrorKind::DnsFailed,
            Self::Deploying => ErrorKind::DeployFailed,
            Self::Notifying => ErrorKind::NotifyFailed,
        }
    }

    /// Returns true if a failure in this step ends the deployment.
    #[must_use]
    pub const fn is_fatal_on_failure(self) -> bool {
        !matches!(self, Self::Notifying)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal result of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Still running.
    Pending,
    /// The application is live. A failed notification is carried as a warning.
    Succeeded {
        /// Non-fatal failure, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<StepError>,
    },
    /// A fatal step failed.
    Failed {
        /// Step that failed.
        step: Step,
        /// Why it failed.
        error: StepError,
    },
}

impl Outcome {
    /// Get the outcome name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    /// Returns true once the outcome has been decided.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Result of undoing one completed step after a fatal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Step whose effect was undone.
    pub step: Step,
    /// Whether the undo succeeded.
    pub succeeded: bool,
    /// Error text when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-flight state of one deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentState {
    id: DeploymentId,
    step: Step,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
    resource: ProvisionedResource,
    outcome: Outcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    compensations: Vec<CompensationRecord>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DeploymentState {
    /// Create a new deployment in the pending state.
    #[must_use]
    pub fn new(id: DeploymentId) -> Self {
        let now = Utc::now();
        Self {
            id,
            step: Step::Pending,
            domain: None,
            resource: ProvisionedResource::default(),
            outcome: Outcome::Pending,
            compensations: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Get the deployment ID.
    #[must_use]
    pub const fn id(&self) -> &DeploymentId {
        &self.id
    }

    /// Get the current step.
    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }

    /// Fully-qualified domain, once the request has been validated.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Resources discovered so far.
    #[must_use]
    pub const fn resource(&self) -> &ProvisionedResource {
        &self.resource
    }

    /// Get the outcome.
    #[must_use]
    pub const fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Compensations attempted after a fatal failure.
    #[must_use]
    pub fn compensations(&self) -> &[CompensationRecord] {
        &self.compensations
    }

    /// When the deployment was created.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the deployment last changed.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Check if the deployment is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Move to `next`, which must be the step directly after the current one.
    pub fn advance(&mut self, next: Step) -> ControlResult<()> {
        if self.is_terminal() || self.step.next() != Some(next) {
            return Err(ControlError::InvalidStateTransition {
                from: self.state_name(),
                to: next.as_str(),
            });
        }
        self.touch(|state| state.step = next);
        Ok(())
    }

    /// Record the fully-qualified domain being deployed.
    pub(crate) fn set_domain(&mut self, domain: String) {
        self.touch(|state| state.domain = Some(domain));
    }

    /// Record what the provisioning step reported.
    pub(crate) fn record_resource(&mut self, resource: ProvisionedResource) {
        self.touch(|state| state.resource = resource);
    }

    /// Record the outcome of a compensating action.
    pub(crate) fn record_compensation(&mut self, record: CompensationRecord) {
        self.touch(|state| state.compensations.push(record));
    }

    /// Finish successfully, optionally carrying a non-fatal warning.
    pub fn succeed(&mut self, warning: Option<StepError>) -> ControlResult<()> {
        self.finish(Outcome::Succeeded { warning }, "succeeded")
    }

    /// Finish with a failure in the current step.
    pub fn fail(&mut self, error: StepError) -> ControlResult<()> {
        let step = self.step;
        self.finish(Outcome::Failed { step, error }, "failed")
    }

    /// Build the payload returned to callers once the deployment is over.
    #[must_use]
    pub fn result(&self) -> DeploymentResult {
        match &self.outcome {
            Outcome::Succeeded { warning } => DeploymentResult {
                success: true,
                step: None,
                domain: self.domain.clone(),
                error: None,
                warning: warning.as_ref().map(|w| w.message.clone()),
            },
            Outcome::Failed { step, error } => DeploymentResult {
                success: false,
                step: Some(step.operation().to_owned()),
                domain: None,
                error: Some(error.message.clone()),
                warning: None,
            },
            Outcome::Pending => DeploymentResult {
                success: false,
                step: Some(self.step.operation().to_owned()),
                domain: None,
                error: Some("deployment has not finished".to_owned()),
                warning: None,
            },
        }
    }

    fn finish(&mut self, outcome: Outcome, to: &'static str) -> ControlResult<()> {
        if self.is_terminal() {
            return Err(ControlError::InvalidStateTransition {
                from: self.state_name(),
                to,
            });
        }
        self.touch(|state| state.outcome = outcome);
        Ok(())
    }

    fn state_name(&self) -> &'static str {
        if self.is_terminal() {
            self.outcome.as_str()
        } else {
            self.step.as_str()
        }
    }

    fn touch(&mut self, f: impl FnOnce(&mut Self)) {
        f(self);
        self.updated_at = Utc::now();
    }
}

/// Terminal payload handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    /// Whether the application is live.
    pub success: bool,
    /// Operation that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Fully-qualified domain of the new instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Error text from the failing collaborator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal problem, such as an undelivered notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl DeploymentResult {
    /// Page where the first super-administrator registers.
    #[must_use]
    pub fn registration_url(&self) -> Option<String> {
        self.domain
            .as_ref()
            .filter(|_| self.success)
            .map(|domain| format!("https://{domain}/auth/register.php"))
    }
}
