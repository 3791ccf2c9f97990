//! Error types for launchpad-control.
//!
//! Two layers live here. [`ControlError`] covers the plumbing around the
//! pipeline (configuration, HTTP client construction, the API server).
//! [`StepError`] and [`CollaboratorError`] describe why a provisioning step
//! failed and travel inside the deployment state rather than through `?`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control service.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },

    /// Deployment not found.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Another deployment for the same subdomain is still running.
    #[error("deployment already in progress for subdomain {0}")]
    SubdomainBusy(String),

    /// Server error.
    #[error("server error: {0}")]
    Server(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error.
    #[must_use]
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator answered and reported an error.
    #[error("{0}")]
    Rejected(String),

    /// The collaborator could not be reached, timed out, or replied with
    /// something that could not be decoded.
    #[error("{0}")]
    Transport(String),
}

impl CollaboratorError {
    /// Create a rejection carrying the collaborator's own error text.
    #[must_use]
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// The error text as reported.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Rejected(msg) | Self::Transport(msg) => msg,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The requested subdomain contains characters outside `[a-z0-9-_]`.
    InvalidSubdomain,
    /// The requested subdomain already resolves.
    AlreadyInUse,
    /// The compute provisioner could not create an instance.
    ProvisioningFailed,
    /// The DNS registrar could not publish the record.
    DnsFailed,
    /// The application deployer failed.
    DeployFailed,
    /// The completion notice could not be delivered. Never fatal.
    NotifyFailed,
    /// A collaborator was unreachable or timed out.
    TransportError,
}

impl ErrorKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSubdomain => "InvalidSubdomain",
            Self::AlreadyInUse => "AlreadyInUse",
            Self::ProvisioningFailed => "ProvisioningFailed",
            Self::DnsFailed => "DnsFailed",
            Self::DeployFailed => "DeployFailed",
            Self::NotifyFailed => "NotifyFailed",
            Self::TransportError => "TransportError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed failure of a single pipeline step.
///
/// `message` is the collaborator's error text, unchanged, so an operator can
/// tell which external system failed from the result alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Underlying error text.
    pub message: String,
}

impl StepError {
    /// Create a new step error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map a collaborator failure onto the step it happened in.
    ///
    /// Rejections take the step's own kind; transport failures keep
    /// [`ErrorKind::TransportError`].
    #[must_use]
    pub fn from_collaborator(kind: ErrorKind, error: CollaboratorError) -> Self {
        match error {
            CollaboratorError::Rejected(message) => Self { kind, message },
            CollaboratorError::Transport(message) => Self {
                kind: ErrorKind::TransportError,
                message,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejection_keeps_step_kind() {
        let err = StepError::from_collaborator(
            ErrorKind::ProvisioningFailed,
            CollaboratorError::rejected("capacity exceeded"),
        );
        assert_eq!(err.kind, ErrorKind::ProvisioningFailed);
        assert_eq!(err.message, "capacity exceeded");
    }

    #[test]
    fn transport_failure_is_reclassified() {
        let err = StepError::from_collaborator(
            ErrorKind::DnsFailed,
            CollaboratorError::transport("connection refused"),
        );
        assert_eq!(err.kind, ErrorKind::TransportError);
        assert_eq!(err.to_string(), "TransportError: connection refused");
    }

    #[test]
    fn kind_serialises_as_variant_name() {
        let json = serde_json::to_string(&ErrorKind::AlreadyInUse).unwrap();
        assert_eq!(json, r#""AlreadyInUse""#);
    }
}
