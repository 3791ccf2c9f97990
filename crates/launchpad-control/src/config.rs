//! Configuration for launchpad-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchpadConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Domain under which instances are published.
    #[serde(default)]
    pub domain: DomainConfig,

    /// Which collaborator implementations to wire up.
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Subdomain availability check.
    #[serde(default)]
    pub availability: AvailabilityConfig,

    /// Compute provisioning service.
    #[serde(default)]
    pub compute: EndpointConfig,

    /// DNS record service.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Application deployment service.
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Completion notice delivery.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Pipeline behaviour.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for LaunchpadConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            domain: DomainConfig::default(),
            collaborators: CollaboratorsConfig::default(),
            availability: AvailabilityConfig::default(),
            compute: EndpointConfig::default(),
            dns: DnsConfig::default(),
            deploy: DeployConfig::default(),
            notify: NotifyConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl LaunchpadConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `launchpad.toml` in the current directory (if present)
    /// 3. Environment variables with `LAUNCHPAD_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("launchpad.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LAUNCHPAD_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that cannot be expressed through serde defaults.
    pub fn validate(&self) -> ControlResult<()> {
        let base = self.domain.base_domain.trim_matches('.');
        if base.is_empty() {
            return Err(ControlError::config("domain.base_domain must not be empty"));
        }
        if self.orchestrator.max_concurrent == 0 {
            return Err(ControlError::config(
                "orchestrator.max_concurrent must be at least 1",
            ));
        }
        if self.collaborators.mode == CollaboratorMode::Http {
            for (name, url) in [
                ("availability.resolver_url", &self.availability.resolver_url),
                ("compute.url", &self.compute.url),
                ("dns.url", &self.dns.endpoint.url),
                ("deploy.url", &self.deploy.url),
                ("notify.url", &self.notify.url),
            ] {
                if url.is_empty() {
                    return Err(ControlError::config(format!(
                        "{name} is required when collaborators.mode = \"http\""
                    )));
                }
            }
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Request timeout in seconds for synchronous deployment runs.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Finished deployments kept for status queries before the oldest are
    /// forgotten.
    #[serde(default = "default_retained_deployments")]
    pub retained_deployments: usize,
}

fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090)
}

const fn default_request_timeout_secs() -> u64 {
    600
}

const fn default_retained_deployments() -> usize {
    1000
}

impl ServerConfig {
    /// How long a synchronous run may keep the request open.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            request_timeout_secs: default_request_timeout_secs(),
            retained_deployments: default_retained_deployments(),
        }
    }
}

/// Domain configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    /// Base domain that subdomains are created under.
    #[serde(default = "default_base_domain")]
    pub base_domain: String,

    /// TTL for published A records, in seconds.
    #[serde(default = "default_dns_ttl")]
    pub dns_ttl: u32,
}

fn default_base_domain() -> String {
    "example.com".to_owned()
}

const fn default_dns_ttl() -> u32 {
    300
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            base_domain: default_base_domain(),
            dns_ttl: default_dns_ttl(),
        }
    }
}

/// Collaborator wiring.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollaboratorsConfig {
    /// Implementation to use for every collaborator.
    #[serde(default)]
    pub mode: CollaboratorMode,
}

/// Type of collaborator implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorMode {
    /// Remote services reached over HTTP.
    #[default]
    Http,

    /// In-process stand-ins that always succeed.
    Mock,
}

/// Availability check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityConfig {
    /// DNS-over-HTTPS JSON resolver endpoint.
    #[serde(default = "default_resolver_url")]
    pub resolver_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_resolver_url() -> String {
    "https://dns.google/resolve".to_owned()
}

impl AvailabilityConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            resolver_url: default_resolver_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A single remote collaborator endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Endpoint URL.
    #[serde(default)]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

impl EndpointConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Application deployment service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// Endpoint URL.
    #[serde(default)]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_deploy_timeout_secs")]
    pub timeout_secs: u64,
}

// Checkout plus web server reload dominates the pipeline.
const fn default_deploy_timeout_secs() -> u64 {
    300
}

impl DeployConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_deploy_timeout_secs(),
        }
    }
}

/// DNS record service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsConfig {
    /// Upsert endpoint.
    #[serde(flatten)]
    pub endpoint: EndpointConfig,

    /// Endpoint used to remove a record during compensation. Defaults to
    /// the upsert endpoint.
    #[serde(default)]
    pub delete_url: Option<String>,
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Email API endpoint.
    #[serde(default)]
    pub url: String,

    /// Email API key.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Sender address.
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Subject line.
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Addresses copied on every completion notice.
    #[serde(default)]
    pub extra_recipients: Vec<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sender() -> String {
    "noreply@example.com".to_owned()
}

fn default_subject() -> String {
    "Your task manager has been created".to_owned()
}

impl NotifyConfig {
    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            sender: default_sender(),
            subject: default_subject(),
            extra_recipients: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Pipeline behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Undo completed steps when a later step fails.
    #[serde(default = "default_compensate_on_failure")]
    pub compensate_on_failure: bool,

    /// Maximum deployments running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

const fn default_compensate_on_failure() -> bool {
    true
}

const fn default_max_concurrent() -> usize {
    10
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            compensate_on_failure: default_compensate_on_failure(),
            max_concurrent: default_max_concurrent(),
        }
    }
}
