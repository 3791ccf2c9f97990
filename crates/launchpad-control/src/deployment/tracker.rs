//! In-memory registry of deployments started through the API.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{ControlError, ControlResult};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::state::{CompensationRecord, DeploymentResult, DeploymentState};
use crate::types::DeploymentId;

/// Point-in-time view of a tracked deployment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSnapshot {
    /// Deployment ID.
    pub id: DeploymentId,
    /// Requested subdomain label.
    pub subdomain: String,
    /// Most recent progress event.
    pub progress: ProgressEvent,
    /// Terminal result, once the deployment is over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DeploymentResult>,
    /// Undo actions attempted after a failure.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compensations: Vec<CompensationRecord>,
}

#[derive(Debug)]
struct Entry {
    snapshot: DeploymentSnapshot,
    sender: broadcast::Sender<ProgressEvent>,
}

/// Releases a subdomain reservation when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    subdomain: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.subdomain);
        }
    }
}

/// Keeps the latest state of every deployment and fans progress out to
/// subscribers.
///
/// At most one deployment per subdomain may be in flight. Only the most
/// recent finished deployments are retained, and data is lost when the
/// process exits.
#[derive(Debug)]
pub struct DeploymentTracker {
    deployments: RwLock<HashMap<String, Entry>>,
    /// IDs of finished deployments, oldest first.
    finished: Mutex<VecDeque<String>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    channel_capacity: usize,
    retention: usize,
}

impl Default for DeploymentTracker {
    fn default() -> Self {
        Self::new(32)
    }
}

const DEFAULT_RETENTION: usize = 1000;

impl DeploymentTracker {
    /// Create a tracker buffering up to `channel_capacity` events per
    /// subscriber.
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            deployments: RwLock::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            channel_capacity: channel_capacity.max(1),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep at most `retention` finished deployments. Running deployments
    /// are never evicted.
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Reserve `subdomain` and start tracking deployment `id`.
    ///
    /// Fails with [`ControlError::SubdomainBusy`] while another deployment
    /// for the same subdomain holds its guard.
    pub fn register(&self, id: &DeploymentId, subdomain: &str) -> ControlResult<InFlightGuard> {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            if !in_flight.insert(subdomain.to_owned()) {
                return Err(ControlError::SubdomainBusy(subdomain.to_owned()));
            }
        }
        let guard = InFlightGuard {
            subdomain: subdomain.to_owned(),
            in_flight: Arc::clone(&self.in_flight),
        };

        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        if deployments.contains_key(id.as_str()) {
            return Err(ControlError::internal(format!(
                "deployment {id} already exists"
            )));
        }

        let (sender, _) = broadcast::channel(self.channel_capacity);
        let snapshot = DeploymentSnapshot {
            id: id.clone(),
            subdomain: subdomain.to_owned(),
            progress: ProgressEvent::from_state(&DeploymentState::new(id.clone())),
            result: None,
            compensations: Vec::new(),
        };
        deployments.insert(id.as_str().to_owned(), Entry { snapshot, sender });
        debug!(deployment_id = %id, subdomain, "tracking deployment");

        Ok(guard)
    }

    /// Record the final state of a deployment.
    ///
    /// Evicts the oldest finished deployments once more than the retention
    /// limit are held.
    pub fn complete(&self, state: &DeploymentState) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        let entry = deployments
            .get_mut(state.id().as_str())
            .ok_or_else(|| ControlError::DeploymentNotFound(state.id().to_string()))?;

        entry.snapshot.progress = ProgressEvent::from_state(state);
        entry.snapshot.result = Some(state.result());
        entry.snapshot.compensations = state.compensations().to_vec();

        let mut finished = self
            .finished
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        finished.push_back(state.id().as_str().to_owned());
        while finished.len() > self.retention {
            if let Some(evicted) = finished.pop_front() {
                deployments.remove(&evicted);
                debug!(deployment_id = %evicted, "evicted finished deployment");
            }
        }
        Ok(())
    }

    /// Latest snapshot of a deployment.
    pub fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentSnapshot>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(deployments.get(id.as_str()).map(|e| e.snapshot.clone()))
    }

    /// Latest event plus a receiver for everything reported after it.
    pub fn subscribe(
        &self,
        id: &DeploymentId,
    ) -> ControlResult<Option<(ProgressEvent, broadcast::Receiver<ProgressEvent>)>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(deployments
            .get(id.as_str())
            .map(|e| (e.snapshot.progress.clone(), e.sender.subscribe())))
    }

    /// Returns true while a deployment for `subdomain` is running.
    #[must_use]
    pub fn is_in_flight(&self, subdomain: &str) -> bool {
        self.in_flight
            .lock()
            .is_ok_and(|in_flight| in_flight.contains(subdomain))
    }

    /// Number of tracked deployments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deployments.read().map_or(0, |d| d.len())
    }

    /// Returns true if nothing has been tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for DeploymentTracker {
    fn report(&self, event: ProgressEvent) {
        let Ok(mut deployments) = self.deployments.write() else {
            return;
        };
        // Events for untracked deployments come from direct runs.
        if let Some(entry) = deployments.get_mut(event.deployment_id.as_str()) {
            entry.snapshot.progress = event.clone();
            let _ = entry.sender.send(event);
        }
    }
}
