//! Deployment endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::deployment::DeploymentSnapshot;
use crate::error::{ControlError, ErrorKind};
use crate::progress::ProgressEvent;
use crate::state::{DeploymentResult, DeploymentState, Outcome};
use crate::types::{DeploymentId, DeploymentRequest, Subdomain};

use super::AppState;

/// Response for starting a deployment.
#[derive(Debug, Serialize)]
pub struct CreateDeploymentResponse {
    /// The assigned deployment ID.
    pub id: String,
    /// Initial status.
    pub status: &'static str,
}

/// Response for a synchronous run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDeploymentResponse {
    /// Deployment ID.
    pub id: String,
    /// Terminal result.
    #[serde(flatten)]
    pub result: DeploymentResult,
    /// Where the first super-administrator signs up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<String>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Deployment the error refers to, if one was started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            id: None,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Start a deployment in the background.
pub async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeploymentRequest>,
) -> Result<(StatusCode, Json<CreateDeploymentResponse>), ApiError> {
    if let Err(e) = Subdomain::parse(&request.subdomain) {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.message))));
    }

    info!(subdomain = %request.subdomain, "creating deployment via API");

    let (id, _handle) = state.start(request).map_err(|e| error_response(&e))?;
    info!(deployment_id = %id, "deployment accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateDeploymentResponse {
            id: id.to_string(),
            status: "pending",
        }),
    ))
}

/// Run a deployment and wait for its result.
///
/// If the result takes longer than the configured request timeout the
/// deployment keeps running and can be followed through its ID.
pub async fn run_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeploymentRequest>,
) -> Result<(StatusCode, Json<RunDeploymentResponse>), ApiError> {
    info!(subdomain = %request.subdomain, "running deployment via API");

    let (id, handle) = state.start(request).map_err(|e| error_response(&e))?;

    match tokio::time::timeout(state.run_timeout, handle).await {
        Ok(Ok(finished)) => {
            let result = finished.result();
            Ok((
                result_status(&finished),
                Json(RunDeploymentResponse {
                    id: id.to_string(),
                    registration_url: result.registration_url(),
                    result,
                }),
            ))
        }
        Ok(Err(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("deployment task failed: {e}"),
                id: Some(id.to_string()),
            }),
        )),
        Err(_) => Err((
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorResponse {
                error: "deployment is still running".to_owned(),
                id: Some(id.to_string()),
            }),
        )),
    }
}

/// Get the latest state of a deployment.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentSnapshot>, ApiError> {
    let deployment_id = DeploymentId::new(&id);

    match state.tracker.get(&deployment_id) {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err(error_response(&ControlError::DeploymentNotFound(id))),
        Err(e) => Err(error_response(&e)),
    }
}

/// Stream progress events.
///
/// The latest event is sent first. The stream ends after the terminal
/// event, which is sent as a `complete` event.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let deployment_id = DeploymentId::new(&id);

    let (latest, mut rx) = state
        .tracker
        .subscribe(&deployment_id)
        .map_err(|e| error_response(&e))?
        .ok_or_else(|| error_response(&ControlError::DeploymentNotFound(id.clone())))?;

    let stream = async_stream::stream! {
        let done = latest.is_terminal();
        if let Some(event) = to_sse(&latest) {
            yield Ok(event);
        }
        if !done {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = event.is_terminal();
                        if let Some(event) = to_sse(&event) {
                            yield Ok(event);
                        }
                        if done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(deployment_id = %id, lagged = n, "progress subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// Encodes a progress event, skipping it if it cannot be serialized.
fn to_sse(event: &ProgressEvent) -> Option<Event> {
    let name = if event.is_terminal() {
        "complete"
    } else {
        "progress"
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!(deployment_id = %event.deployment_id, error = %e, "dropping unencodable progress event");
            None
        }
    }
}

fn error_response(error: &ControlError) -> ApiError {
    (
        error_to_status(error),
        Json(ErrorResponse::new(error.to_string())),
    )
}

const fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::DeploymentNotFound(_) => StatusCode::NOT_FOUND,
        ControlError::SubdomainBusy(_) | ControlError::InvalidStateTransition { .. } => {
            StatusCode::CONFLICT
        }
        ControlError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Status code for a finished deployment.
fn result_status(state: &DeploymentState) -> StatusCode {
    match state.outcome() {
        Outcome::Succeeded { .. } => StatusCode::OK,
        Outcome::Failed { error, .. } => match error.kind {
            ErrorKind::InvalidSubdomain => StatusCode::BAD_REQUEST,
            ErrorKind::AlreadyInUse => StatusCode::CONFLICT,
            _ => StatusCode::BAD_GATEWAY,
        },
        Outcome::Pending => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
