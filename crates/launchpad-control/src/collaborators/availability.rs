//! Subdomain availability via a DNS-over-HTTPS JSON resolver.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::AvailabilityConfig;
use crate::error::{CollaboratorError, ControlResult};

use super::http::{build_client, error_text};
use super::{AvailabilityChecker, AvailabilityQuery, CollaboratorResult};

/// Resolver response, as returned by `dns.google/resolve` and compatible
/// services.
#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(rename = "Status", default)]
    status: u16,
    #[serde(rename = "Answer", default)]
    answer: Vec<serde_json::Value>,
}

/// DNS RCODE for a successful lookup.
const RCODE_NOERROR: u16 = 0;
/// DNS RCODE for a name that does not exist.
const RCODE_NXDOMAIN: u16 = 3;

/// Availability checker backed by a DNS-over-HTTPS JSON API.
#[derive(Debug, Clone)]
pub struct DohAvailabilityChecker {
    client: Client,
    resolver_url: String,
}

impl DohAvailabilityChecker {
    /// Create a new checker from configuration.
    pub fn new(config: &AvailabilityConfig) -> ControlResult<Self> {
        Ok(Self {
            client: build_client(config.timeout())?,
            resolver_url: config.resolver_url.clone(),
        })
    }
}

#[async_trait]
impl AvailabilityChecker for DohAvailabilityChecker {
    async fn is_resolvable(&self, query: &AvailabilityQuery) -> CollaboratorResult<bool> {
        let name = query.fqdn();
        let response = self
            .client
            .get(&self.resolver_url)
            .query(&[("name", name.as_str()), ("type", "A")])
            .header(ACCEPT, "application/dns-json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Transport(format!(
                "resolver error: {}",
                error_text(status, &body)
            )));
        }

        let body: ResolveResponse = response.json().await?;
        debug!(name = %name, rcode = body.status, answers = body.answer.len(), "resolved");

        match body.status {
            RCODE_NOERROR => Ok(!body.answer.is_empty()),
            RCODE_NXDOMAIN => Ok(false),
            rcode => Err(CollaboratorError::Transport(format!(
                "resolver returned rcode {rcode} for {name}"
            ))),
        }
    }
}
