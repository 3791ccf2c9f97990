//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Starting deployments, in the background or synchronously
//! - Querying the latest state of a deployment
//! - Streaming progress as server-sent events
//! - Health checks

mod deployments;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::collaborators::Collaborators;
use crate::config::LaunchpadConfig;
use crate::deployment::{DeploymentTracker, Orchestrator};
use crate::error::ControlResult;
use crate::progress::ProgressSink;
use crate::state::DeploymentState;
use crate::types::{DeploymentId, DeploymentRequest};

pub use deployments::{CreateDeploymentResponse, ErrorResponse, RunDeploymentResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Runs the pipeline.
    pub orchestrator: Arc<Orchestrator>,
    /// Latest state and progress channel of every deployment.
    pub tracker: Arc<DeploymentTracker>,
    /// Limits how many deployments run at once.
    pub permits: Arc<Semaphore>,
    /// Background deployment tasks.
    pub tasks: TaskTracker,
    /// How long `POST /deployments/run` waits for a result.
    pub run_timeout: Duration,
}

impl AppState {
    /// Wire an orchestrator and tracker together.
    #[must_use]
    pub fn new(collaborators: Collaborators, config: &LaunchpadConfig) -> Self {
        let tracker = Arc::new(
            DeploymentTracker::default().with_retention(config.server.retained_deployments),
        );
        let sink: Arc<dyn ProgressSink> = tracker.clone();
        let orchestrator = Orchestrator::new(collaborators, config).with_progress(sink);

        Self {
            orchestrator: Arc::new(orchestrator),
            tracker,
            permits: Arc::new(Semaphore::new(config.orchestrator.max_concurrent)),
            tasks: TaskTracker::new(),
            run_timeout: config.server.request_timeout(),
        }
    }

    /// Start a deployment in the background.
    ///
    /// The subdomain stays reserved until the returned task finishes. Once
    /// `max_concurrent` deployments are running, new ones queue for a permit.
    pub fn start(
        &self,
        request: DeploymentRequest,
    ) -> ControlResult<(DeploymentId, JoinHandle<DeploymentState>)> {
        let id = DeploymentId::generate();
        let guard = self.tracker.register(&id, &request.subdomain)?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let tracker = Arc::clone(&self.tracker);
        let permits = Arc::clone(&self.permits);
        let task_id = id.clone();

        let handle = self.tasks.spawn(async move {
            let _guard = guard;
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();

            let state = orchestrator.run_with_id(task_id, request).await;
            if let Err(e) = tracker.complete(&state) {
                warn!(deployment_id = %state.id(), error = %e, "failed to record result");
            }
            state
        });

        Ok((id, handle))
    }
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/deployments", post(deployments::create_deployment))
        .route("/deployments/run", post(deployments::run_deployment))
        .route("/deployments/{id}", get(deployments::get_deployment))
        .route("/deployments/{id}/events", get(deployments::stream_events))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy",
        tracked_deployments: state.tracker.len(),
    })
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    tracked_deployments: usize,
}
