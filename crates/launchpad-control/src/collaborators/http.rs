//! HTTP clients for the remote collaborators.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{DeployConfig, DnsConfig, EndpointConfig, NotifyConfig};
use crate::error::{CollaboratorError, ControlError, ControlResult};

use super::{
    AppDeployRequest, ApplicationDeployer, CollaboratorResult, ComputeProvisioner,
    DnsRecordRequest, DnsRegistrar, NotifyRequest, Notifier, ProvisionRequest,
    ProvisionedInstance,
};

pub(super) fn build_client(timeout: Duration) -> ControlResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ControlError::Http)
}

/// Decode a successful JSON response, or turn a failed one into a rejection
/// carrying the service's own error text.
pub(super) async fn read_json<T: DeserializeOwned>(response: Response) -> CollaboratorResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CollaboratorError::Rejected(error_text(status, &body)));
    }
    response.json().await.map_err(CollaboratorError::from)
}

async fn expect_success(response: Response) -> CollaboratorResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Rejected(error_text(status, &body)))
}

/// Pull the most specific error message out of a failed response body.
///
/// Looks for `error`, then `data.error`, then `message`; falls back to the raw
/// body and finally to the status line.
pub(super) fn error_text(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.get("error"),
            value.get("data").and_then(|data| data.get("error")),
            value.get("message"),
        ];
        if let Some(text) = candidates
            .into_iter()
            .flatten()
            .find_map(serde_json::Value::as_str)
        {
            return text.to_owned();
        }
    }

    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        body.to_owned()
    }
}

/// Compute provisioner reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpComputeProvisioner {
    client: Client,
    url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProvisionResponse {
    Wrapped { data: ProvisionedInstance },
    Bare(ProvisionedInstance),
}

impl HttpComputeProvisioner {
    /// Create a new client from configuration.
    pub fn new(config: &EndpointConfig) -> ControlResult<Self> {
        Ok(Self {
            client: build_client(config.timeout())?,
            url: config.url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl ComputeProvisioner for HttpComputeProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> CollaboratorResult<ProvisionedInstance> {
        debug!(url = %self.url, subdomain = %request.subdomain, "requesting instance");
        let response = self.client.post(&self.url).json(request).send().await?;

        match read_json(response).await? {
            ProvisionResponse::Wrapped { data } | ProvisionResponse::Bare(data) => Ok(data),
        }
    }

    async fn deprovision(&self, instance_id: &str) -> CollaboratorResult<()> {
        let url = format!("{}/{}", self.url, instance_id);
        debug!(url = %url, "releasing instance");
        let response = self.client.delete(&url).send().await?;

        match response.status() {
            // Already gone.
            StatusCode::NOT_FOUND => Ok(()),
            _ => expect_success(response).await,
        }
    }
}

/// DNS registrar reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDnsRegistrar {
    client: Client,
    url: String,
    delete_url: String,
}

#[derive(Serialize)]
struct DnsChange<'a> {
    action: &'static str,
    #[serde(flatten)]
    record: &'a DnsRecordRequest,
}

#[derive(Deserialize)]
struct DomainResponse {
    #[serde(default)]
    domain: Option<String>,
}

impl HttpDnsRegistrar {
    /// Create a new client from configuration.
    pub fn new(config: &DnsConfig) -> ControlResult<Self> {
        let url = config.endpoint.url.trim_end_matches('/').to_owned();
        let delete_url = config
            .delete_url
            .as_deref()
            .map_or_else(|| url.clone(), |u| u.trim_end_matches('/').to_owned());

        Ok(Self {
            client: build_client(config.endpoint.timeout())?,
            url,
            delete_url,
        })
    }
}

#[async_trait]
impl DnsRegistrar for HttpDnsRegistrar {
    async fn upsert(&self, record: &DnsRecordRequest) -> CollaboratorResult<String> {
        let change = DnsChange {
            action: "UPSERT",
            record,
        };
        let response = self.client.post(&self.url).json(&change).send().await?;
        let body: DomainResponse = read_json(response).await?;

        Ok(body.domain.unwrap_or_else(|| record.subdomain.clone()))
    }

    async fn remove(&self, record: &DnsRecordRequest) -> CollaboratorResult<()> {
        let change = DnsChange {
            action: "DELETE",
            record,
        };
        let response = self
            .client
            .post(&self.delete_url)
            .json(&change)
            .send()
            .await?;
        expect_success(response).await
    }
}

/// Application deployer reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApplicationDeployer {
    client: Client,
    url: String,
}

impl HttpApplicationDeployer {
    /// Create a new client from configuration.
    pub fn new(config: &DeployConfig) -> ControlResult<Self> {
        Ok(Self {
            client: build_client(config.timeout())?,
            url: config.url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl ApplicationDeployer for HttpApplicationDeployer {
    async fn deploy(&self, request: &AppDeployRequest) -> CollaboratorResult<String> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let body: DomainResponse = read_json(response).await?;

        Ok(body.domain.unwrap_or_else(|| request.domain.clone()))
    }
}

/// Email notifier speaking the SMTP2GO send API.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    sender: String,
    subject: String,
    extra_recipients: Vec<String>,
}

#[derive(Serialize)]
struct EmailMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    to: Vec<&'a str>,
    sender: &'a str,
    subject: &'a str,
    text_body: String,
}

#[derive(Deserialize, Default)]
struct SendResponse {
    #[serde(default)]
    data: SendResult,
}

#[derive(Deserialize, Default)]
struct SendResult {
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    failures: Vec<serde_json::Value>,
}

impl HttpNotifier {
    /// Create a new client from configuration.
    pub fn new(config: &NotifyConfig) -> ControlResult<Self> {
        Ok(Self {
            client: build_client(config.timeout())?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            sender: config.sender.clone(),
            subject: config.subject.clone(),
            extra_recipients: config.extra_recipients.clone(),
        })
    }

    fn message<'a>(&'a self, request: &'a NotifyRequest) -> EmailMessage<'a> {
        let mut to: Vec<&str> = request.recipients.iter().map(String::as_str).collect();
        for extra in &self.extra_recipients {
            if !to.contains(&extra.as_str()) {
                to.push(extra);
            }
        }

        EmailMessage {
            api_key: self.api_key.as_ref().map(|key| key.expose_secret()),
            to,
            sender: &self.sender,
            subject: &self.subject,
            text_body: format!(
                "A new task manager is live now, please check this URL: https://{}",
                request.domain
            ),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, request: &NotifyRequest) -> CollaboratorResult<()> {
        let message = self.message(request);
        let response = self.client.post(&self.url).json(&message).send().await?;
        let body: SendResponse = read_json(response).await?;

        if body.data.failed > 0 {
            let reasons: Vec<String> = body
                .data
                .failures
                .iter()
                .map(|f| f.as_str().map_or_else(|| f.to_string(), ToOwned::to_owned))
                .collect();
            return Err(CollaboratorError::Rejected(format!(
                "{} recipient(s) rejected: {}",
                body.data.failed,
                reasons.join(", ")
            )));
        }

        Ok(())
    }
}
