//! Progress reporting.
//!
//! The orchestrator emits a [`ProgressEvent`] after every step transition and
//! once more when the outcome is decided. Reporting is fire-and-forget: sinks
//! must not block, and a lost event never changes the deployment itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::{DeploymentState, Outcome, Step};
use crate::types::{DeploymentId, ProvisionedResource};

/// Snapshot of a deployment taken at a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Deployment this event belongs to.
    pub deployment_id: DeploymentId,
    /// Position of `step` in the pipeline, `Pending` being 0.
    pub step_index: usize,
    /// Number of collaborator steps in the pipeline.
    pub total_steps: usize,
    /// Step just entered.
    pub step: Step,
    /// Human-readable label for `step`.
    pub label: &'static str,
    /// Resources discovered so far.
    pub resource: ProvisionedResource,
    /// Outcome, `Pending` until the final event.
    pub outcome: Outcome,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Capture the current state of a deployment.
    #[must_use]
    pub fn from_state(state: &DeploymentState) -> Self {
        let step = state.step();
        Self {
            deployment_id: state.id().clone(),
            step_index: step.index(),
            total_steps: Step::PIPELINE.len(),
            step,
            label: step.label(),
            resource: state.resource().clone(),
            outcome: state.outcome().clone(),
            timestamp: Utc::now(),
        }
    }

    /// Returns true for the final event of a deployment.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.outcome.is_terminal()
    }
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    /// Accept an event. Must return promptly and never fail.
    fn report(&self, event: ProgressEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Sink that fans events out over a broadcast channel.
///
/// Events sent while nobody is subscribed are dropped; slow subscribers
/// see a lag error and skip ahead.
#[derive(Debug, Clone)]
pub struct BroadcastProgress {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgress {
    /// Create a channel buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastProgress {
    fn default() -> Self {
        Self::new(32)
    }
}

impl ProgressSink for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}
