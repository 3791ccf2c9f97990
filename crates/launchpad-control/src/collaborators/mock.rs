//! In-process collaborators.
//!
//! Used when the service runs with `collaborators.mode = "mock"` and by the
//! tests. Every mock counts its calls, remembers what it was asked, and can be
//! told to fail. Mocks built with `stateless()` keep only their call counts,
//! so a long-running service in mock mode does not accumulate history.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::CollaboratorError;

use super::{
    AppDeployRequest, ApplicationDeployer, AvailabilityChecker, AvailabilityQuery,
    CollaboratorResult, Collaborators, ComputeProvisioner, DnsRecordRequest, DnsRegistrar,
    NotifyRequest, Notifier, ProvisionRequest, ProvisionedInstance,
};

fn poisoned() -> CollaboratorError {
    CollaboratorError::transport("lock poisoned")
}

fn check(failure: Option<&CollaboratorError>) -> CollaboratorResult<()> {
    failure.map_or(Ok(()), |error| Err(error.clone()))
}

/// Availability checker that resolves a fixed set of names.
#[derive(Debug, Default)]
pub struct MockAvailability {
    taken: HashSet<String>,
    failure: Option<CollaboratorError>,
    calls: AtomicUsize,
}

impl MockAvailability {
    /// Treat `fqdn` as already resolvable. Matching is case-insensitive.
    #[must_use]
    pub fn with_taken(mut self, fqdn: &str) -> Self {
        self.taken.insert(fqdn.to_ascii_lowercase());
        self
    }

    /// Fail every call with `error`.
    #[must_use]
    pub fn failing(mut self, error: CollaboratorError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Number of calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilityChecker for MockAvailability {
    async fn is_resolvable(&self, query: &AvailabilityQuery) -> CollaboratorResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        check(self.failure.as_ref())?;
        Ok(self.taken.contains(&query.fqdn()))
    }
}

/// Compute provisioner that hands out sequential documentation addresses.
#[derive(Debug, Default)]
pub struct MockCompute {
    instance: Option<ProvisionedInstance>,
    failure: Option<CollaboratorError>,
    deprovision_failure: Option<CollaboratorError>,
    stateless: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProvisionRequest>>,
    running: Mutex<HashSet<String>>,
    released: Mutex<Vec<String>>,
}

impl MockCompute {
    /// Always return `instance`.
    #[must_use]
    pub fn with_instance(mut self, instance: ProvisionedInstance) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Fail every provision call with `error`.
    #[must_use]
    pub fn failing(mut self, error: CollaboratorError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fail every deprovision call with `error`.
    #[must_use]
    pub fn failing_deprovision(mut self, error: CollaboratorError) -> Self {
        self.deprovision_failure = Some(error);
        self
    }

    /// Count calls but remember no requests or instances.
    #[must_use]
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Number of provision calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Provision requests received, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Instances still allocated.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Instances released through compensation.
    #[must_use]
    pub fn released(&self) -> Vec<String> {
        self.released.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ComputeProvisioner for MockCompute {
    async fn provision(&self, request: &ProvisionRequest) -> CollaboratorResult<ProvisionedInstance> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.stateless {
            self.requests
                .lock()
                .map_err(|_| poisoned())?
                .push(request.clone());
        }
        check(self.failure.as_ref())?;

        let instance = self.instance.clone().unwrap_or_else(|| {
            let octet = n % 254 + 1;
            ProvisionedInstance {
                instance_id: format!("i-{n:08x}"),
                public_ip: format!("192.0.2.{octet}"),
                public_dns: format!("ec2-192-0-2-{octet}.compute.example.com"),
            }
        });

        if !self.stateless {
            self.running
                .lock()
                .map_err(|_| poisoned())?
                .insert(instance.instance_id.clone());
        }

        Ok(instance)
    }

    async fn deprovision(&self, instance_id: &str) -> CollaboratorResult<()> {
        check(self.deprovision_failure.as_ref())?;
        if self.stateless {
            return Ok(());
        }
        self.running
            .lock()
            .map_err(|_| poisoned())?
            .remove(instance_id);
        self.released
            .lock()
            .map_err(|_| poisoned())?
            .push(instance_id.to_owned());
        Ok(())
    }
}

/// DNS registrar holding records in memory, last write wins.
#[derive(Debug)]
pub struct MockDns {
    base_domain: String,
    failure: Option<CollaboratorError>,
    stateless: bool,
    calls: AtomicUsize,
    records: Mutex<HashMap<String, String>>,
    removed: Mutex<Vec<String>>,
}

impl Default for MockDns {
    fn default() -> Self {
        Self {
            base_domain: "example.com".to_owned(),
            failure: None,
            stateless: false,
            calls: AtomicUsize::new(0),
            records: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl MockDns {
    /// Report published domains under `base_domain`.
    #[must_use]
    pub fn with_base_domain(mut self, base_domain: &str) -> Self {
        self.base_domain = base_domain.to_owned();
        self
    }

    /// Fail every upsert with `error`.
    #[must_use]
    pub fn failing(mut self, error: CollaboratorError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Count calls but hold no records.
    #[must_use]
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Number of upsert calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Address currently published for `subdomain`.
    #[must_use]
    pub fn record(&self, subdomain: &str) -> Option<String> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(subdomain).cloned())
    }

    /// Subdomains whose records were removed.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DnsRegistrar for MockDns {
    async fn upsert(&self, record: &DnsRecordRequest) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        check(self.failure.as_ref())?;
        if !self.stateless {
            self.records
                .lock()
                .map_err(|_| poisoned())?
                .insert(record.subdomain.clone(), record.target_ip.clone());
        }
        Ok(format!("{}.{}", record.subdomain, self.base_domain))
    }

    async fn remove(&self, record: &DnsRecordRequest) -> CollaboratorResult<()> {
        if self.stateless {
            return Ok(());
        }
        self.records
            .lock()
            .map_err(|_| poisoned())?
            .remove(&record.subdomain);
        self.removed
            .lock()
            .map_err(|_| poisoned())?
            .push(record.subdomain.clone());
        Ok(())
    }
}

/// Application deployer that records what it deployed.
#[derive(Debug, Default)]
pub struct MockDeployer {
    failure: Option<CollaboratorError>,
    stateless: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<AppDeployRequest>>,
}

impl MockDeployer {
    /// Fail every call with `error`.
    #[must_use]
    pub fn failing(mut self, error: CollaboratorError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Count calls but keep no requests.
    #[must_use]
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Number of calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<AppDeployRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ApplicationDeployer for MockDeployer {
    async fn deploy(&self, request: &AppDeployRequest) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.stateless {
            self.requests
                .lock()
                .map_err(|_| poisoned())?
                .push(request.clone());
        }
        check(self.failure.as_ref())?;
        Ok(request.domain.clone())
    }
}

/// Notifier that records what it would have sent.
#[derive(Debug, Default)]
pub struct MockNotifier {
    failure: Option<CollaboratorError>,
    stateless: bool,
    calls: AtomicUsize,
    sent: Mutex<Vec<NotifyRequest>>,
}

impl MockNotifier {
    /// Fail every call with `error`.
    #[must_use]
    pub fn failing(mut self, error: CollaboratorError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Count calls but keep no notices.
    #[must_use]
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Number of calls made.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Notices delivered, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<NotifyRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, request: &NotifyRequest) -> CollaboratorResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        check(self.failure.as_ref())?;
        if !self.stateless {
            self.sent
                .lock()
                .map_err(|_| poisoned())?
                .push(request.clone());
        }
        Ok(())
    }
}

/// A full set of mocks, kept by concrete type so callers can inspect them.
#[derive(Debug, Clone, Default)]
pub struct MockCollaborators {
    /// Availability checker.
    pub availability: Arc<MockAvailability>,
    /// Compute provisioner.
    pub compute: Arc<MockCompute>,
    /// DNS registrar.
    pub dns: Arc<MockDns>,
    /// Application deployer.
    pub deployer: Arc<MockDeployer>,
    /// Notifier.
    pub notifier: Arc<MockNotifier>,
}

impl MockCollaborators {
    /// Mocks that always succeed and remember nothing but call counts.
    #[must_use]
    pub fn stateless(base_domain: &str) -> Self {
        Self {
            availability: Arc::new(MockAvailability::default()),
            compute: Arc::new(MockCompute::default().stateless()),
            dns: Arc::new(
                MockDns::default()
                    .with_base_domain(base_domain)
                    .stateless(),
            ),
            deployer: Arc::new(MockDeployer::default().stateless()),
            notifier: Arc::new(MockNotifier::default().stateless()),
        }
    }

    /// Type-erased view for the orchestrator.
    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            availability: self.availability.clone(),
            compute: self.compute.clone(),
            dns: self.dns.clone(),
            deployer: self.deployer.clone(),
            notifier: self.notifier.clone(),
        }
    }

    /// Total calls across the forward operations of every collaborator.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.availability.calls()
            + self.compute.calls()
            + self.dns.calls()
            + self.deployer.calls()
            + self.notifier.calls()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(subdomain: &str, ip: &str) -> DnsRecordRequest {
        DnsRecordRequest {
            subdomain: subdomain.to_owned(),
            target_ip: ip.to_owned(),
            instance_id: None,
            ttl: 300,
        }
    }

    #[tokio::test]
    async fn availability_matches_case_insensitively() {
        let mock = MockAvailability::default().with_taken("Taken.Example.com");
        let query = AvailabilityQuery {
            subdomain: "taken".to_owned(),
            base_domain: "example.com".to_owned(),
        };
        assert!(mock.is_resolvable(&query).await.unwrap());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn compute_lifecycle() {
        let compute = MockCompute::default();
        let request = ProvisionRequest {
            subdomain: "demo1".to_owned(),
            admin_email: "c@d.com".to_owned(),
        };

        let first = compute.provision(&request).await.unwrap();
        let second = compute.provision(&request).await.unwrap();
        assert_ne!(first.instance_id, second.instance_id);
        assert_eq!(compute.running().len(), 2);

        compute.deprovision(&first.instance_id).await.unwrap();
        assert_eq!(compute.running(), vec![second.instance_id]);
        assert_eq!(compute.released(), vec![first.instance_id]);
    }

    #[tokio::test]
    async fn dns_upsert_is_last_write_wins() {
        let dns = MockDns::default();
        dns.upsert(&record("demo1", "1.1.1.1")).await.unwrap();
        let domain = dns.upsert(&record("demo1", "2.2.2.2")).await.unwrap();

        assert_eq!(domain, "demo1.example.com");
        assert_eq!(dns.record("demo1").as_deref(), Some("2.2.2.2"));

        dns.remove(&record("demo1", "2.2.2.2")).await.unwrap();
        assert!(dns.record("demo1").is_none());
    }

    #[tokio::test]
    async fn failing_notifier_records_nothing() {
        let notifier = MockNotifier::default().failing(CollaboratorError::rejected("smtp down"));
        let request = NotifyRequest {
            domain: "demo1.example.com".to_owned(),
            recipients: vec!["a@b.com".to_owned()],
        };

        let err = notifier.notify(&request).await.unwrap_err();
        assert_eq!(err.message(), "smtp down");
        assert_eq!(notifier.calls(), 1);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn stateless_mocks_keep_only_counts() {
        let mocks = MockCollaborators::stateless("tasks.example.org");
        let request = ProvisionRequest {
            subdomain: "demo1".to_owned(),
            admin_email: "c@d.com".to_owned(),
        };

        for _ in 0..3 {
            let instance = mocks.compute.provision(&request).await.unwrap();
            let domain = mocks
                .dns
                .upsert(&record("demo1", &instance.public_ip))
                .await
                .unwrap();
            assert_eq!(domain, "demo1.tasks.example.org");
        }

        assert_eq!(mocks.compute.calls(), 3);
        assert_eq!(mocks.dns.calls(), 3);
        assert!(mocks.compute.requests().is_empty());
        assert!(mocks.compute.running().is_empty());
        assert!(mocks.dns.record("demo1").is_none());
    }
}
