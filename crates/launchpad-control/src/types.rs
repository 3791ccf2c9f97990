//! Core types for launchpad-control.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, StepError};

/// Pattern a requested subdomain must match in full.
static SUBDOMAIN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9\-_]+$").ok());

/// Unique identifier for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique deployment ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated subdomain label.
///
/// Only lower-case ASCII letters, digits, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Subdomain(String);

impl Subdomain {
    /// Validate and wrap a subdomain label.
    pub fn parse(raw: &str) -> Result<Self, StepError> {
        if is_valid_subdomain(raw) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(StepError::new(
                ErrorKind::InvalidSubdomain,
                format!(
                    "invalid subdomain '{raw}': only lower-case letters, digits, '-' and '_' are allowed"
                ),
            ))
        }
    }

    /// Get the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully-qualified domain under `base_domain`, lower-cased.
    #[must_use]
    pub fn fqdn(&self, base_domain: &str) -> String {
        format!(
            "{}.{}",
            self.0,
            base_domain.trim_matches('.').to_ascii_lowercase()
        )
    }
}

impl fmt::Display for Subdomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Subdomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check whether `raw` is an acceptable subdomain label.
#[must_use]
pub fn is_valid_subdomain(raw: &str) -> bool {
    SUBDOMAIN_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(raw))
}

/// Request to provision a new task manager instance.
///
/// The subdomain is kept as submitted; it is validated when the pipeline
/// starts so that a bad label still produces a terminal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    /// Requested subdomain label.
    pub subdomain: String,
    /// Where the completion notice goes.
    pub contact_email: String,
    /// Super-administrator account created on the new instance.
    pub admin_email: String,
}

impl DeploymentRequest {
    /// Create a new deployment request.
    #[must_use]
    pub fn new(
        subdomain: impl Into<String>,
        contact_email: impl Into<String>,
        admin_email: impl Into<String>,
    ) -> Self {
        Self {
            subdomain: subdomain.into(),
            contact_email: contact_email.into(),
            admin_email: admin_email.into(),
        }
    }
}

/// Facts discovered about the provisioned instance.
///
/// Fields stay `None` until the provisioning step reports them and are never
/// cleared afterwards, even if the deployment fails later on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedResource {
    /// Compute instance identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Public IPv4 address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// Provider-assigned public DNS name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_dns: Option<String>,
}

impl ProvisionedResource {
    /// Returns true once the provisioning step has filled in the instance.
    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        self.instance_id.is_some()
    }
}
