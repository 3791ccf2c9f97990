//! External services the pipeline depends on.
//!
//! Each collaborator is a single-purpose remote operation behind an async
//! trait. The orchestrator only ever sees the traits; HTTP clients and
//! in-process mocks are wired up by [`create_collaborators`].

mod availability;
mod http;
pub mod mock;

pub use availability::DohAvailabilityChecker;
pub use http::{HttpApplicationDeployer, HttpComputeProvisioner, HttpDnsRegistrar, HttpNotifier};
pub use mock::MockCollaborators;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{CollaboratorMode, LaunchpadConfig};
use crate::error::{CollaboratorError, ControlResult};
use crate::types::ProvisionedResource;

/// Result type for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Question put to the availability checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    /// Requested label.
    pub subdomain: String,
    /// Domain the label lives under.
    pub base_domain: String,
}

impl AvailabilityQuery {
    /// Lower-cased fully-qualified name to resolve.
    #[must_use]
    pub fn fqdn(&self) -> String {
        format!(
            "{}.{}",
            self.subdomain.to_ascii_lowercase(),
            self.base_domain.trim_matches('.').to_ascii_lowercase()
        )
    }
}

/// Request to create a compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionRequest {
    /// Label the instance is created for.
    pub subdomain: String,
    /// Super-administrator of the new task manager.
    #[serde(rename = "superadminEmail")]
    pub admin_email: String,
}

/// Instance created by the compute provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedInstance {
    /// Provider instance identifier.
    pub instance_id: String,
    /// Public IPv4 address.
    pub public_ip: String,
    /// Provider-assigned public DNS name.
    pub public_dns: String,
}

impl From<ProvisionedInstance> for ProvisionedResource {
    fn from(instance: ProvisionedInstance) -> Self {
        Self {
            instance_id: Some(instance.instance_id),
            public_ip: Some(instance.public_ip),
            public_dns: Some(instance.public_dns),
        }
    }
}

/// A DNS A record pointing a subdomain at an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordRequest {
    /// Label to publish.
    pub subdomain: String,
    /// Address the record points at.
    pub target_ip: String,
    /// Instance behind the address, for the registrar's bookkeeping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Record TTL in seconds.
    pub ttl: u32,
}

/// Request to put the application onto a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDeployRequest {
    /// Fully-qualified domain to serve.
    pub domain: String,
    /// Contact for the new instance.
    pub contact_email: String,
}

/// Completion notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyRequest {
    /// Fully-qualified domain of the live instance.
    pub domain: String,
    /// Who to tell.
    pub recipients: Vec<String>,
}

/// Checks whether a name already resolves.
#[async_trait]
pub trait AvailabilityChecker: Send + Sync {
    /// Returns true if `query.fqdn()` resolves to at least one record.
    async fn is_resolvable(&self, query: &AvailabilityQuery) -> CollaboratorResult<bool>;
}

/// Creates and removes virtual machines.
#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Create an instance. Not idempotent.
    async fn provision(&self, request: &ProvisionRequest) -> CollaboratorResult<ProvisionedInstance>;

    /// Release a previously created instance.
    async fn deprovision(&self, instance_id: &str) -> CollaboratorResult<()>;
}

/// Publishes DNS records with upsert semantics.
#[async_trait]
pub trait DnsRegistrar: Send + Sync {
    /// Create or overwrite the record. Returns the published domain.
    async fn upsert(&self, record: &DnsRecordRequest) -> CollaboratorResult<String>;

    /// Delete the record.
    async fn remove(&self, record: &DnsRecordRequest) -> CollaboratorResult<()>;
}

/// Materialises application code on a host and serves it over HTTP.
#[async_trait]
pub trait ApplicationDeployer: Send + Sync {
    /// Deploy and return the domain now being served.
    async fn deploy(&self, request: &AppDeployRequest) -> CollaboratorResult<String>;
}

/// Delivers the completion notice.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the notice to every recipient.
    async fn notify(&self, request: &NotifyRequest) -> CollaboratorResult<()>;
}

/// The full set of collaborators used by one orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    /// Subdomain availability.
    pub availability: Arc<dyn AvailabilityChecker>,
    /// Compute instances.
    pub compute: Arc<dyn ComputeProvisioner>,
    /// DNS records.
    pub dns: Arc<dyn DnsRegistrar>,
    /// Application deployment.
    pub deployer: Arc<dyn ApplicationDeployer>,
    /// Completion notices.
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Create collaborators from configuration.
pub fn create_collaborators(config: &LaunchpadConfig) -> ControlResult<Collaborators> {
    match config.collaborators.mode {
        CollaboratorMode::Http => Ok(Collaborators {
            availability: Arc::new(DohAvailabilityChecker::new(&config.availability)?),
            compute: Arc::new(HttpComputeProvisioner::new(&config.compute)?),
            dns: Arc::new(HttpDnsRegistrar::new(&config.dns)?),
            deployer: Arc::new(HttpApplicationDeployer::new(&config.deploy)?),
            notifier: Arc::new(HttpNotifier::new(&config.notify)?),
        }),
        CollaboratorMode::Mock => {
            Ok(MockCollaborators::stateless(&config.domain.base_domain).collaborators())
        }
    }
}
