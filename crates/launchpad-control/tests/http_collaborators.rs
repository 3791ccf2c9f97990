//! Integration tests for the HTTP collaborator clients against in-process
//! stand-ins of the remote services.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use common::fixtures::{demo1, RequestBuilder};
use launchpad_control::collaborators::{
    create_collaborators, AvailabilityChecker, AvailabilityQuery, ComputeProvisioner,
    DohAvailabilityChecker, HttpComputeProvisioner, ProvisionRequest,
};
use launchpad_control::config::{AvailabilityConfig, EndpointConfig};
use launchpad_control::{CollaboratorError, ErrorKind, LaunchpadConfig, Orchestrator, Outcome};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Requests received by the fake services, keyed by route.
#[derive(Clone, Default)]
struct Recorded {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Recorded {
    fn push(&self, route: &str, body: Value) {
        self.calls.lock().unwrap().push((route.to_string(), body));
    }

    fn bodies(&self, route: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == route)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

async fn resolve(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    match params.get("name").map(String::as_str) {
        Some("taken.example.com") => Json(json!({
            "Status": 0,
            "Answer": [{"name": "taken.example.com.", "type": 1, "TTL": 300, "data": "5.6.7.8"}]
        })),
        Some("broken.example.com") => Json(json!({"Status": 2})),
        _ => Json(json!({"Status": 3})),
    }
}

async fn create_instance(
    State(recorded): State<Recorded>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("instances", body.clone());
    if body["subdomain"] == "full" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Error creating instance", "error": "capacity exceeded"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"data": {
            "instanceId": "i-1",
            "publicIp": "1.2.3.4",
            "publicDns": "ec2-1-2-3-4.example.com"
        }})),
    )
}

async fn delete_instance(State(recorded): State<Recorded>, Path(id): Path<String>) -> StatusCode {
    recorded.push("instances/delete", json!(id));
    StatusCode::NO_CONTENT
}

async fn change_dns(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("dns", body.clone());
    let subdomain = body["subdomain"].as_str().unwrap_or_default();
    Json(json!({"domain": format!("{subdomain}.example.com")}))
}

async fn deploy(
    State(recorded): State<Recorded>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.push("deploy", body.clone());
    if body["domain"] == "broken-deploy.example.com" {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": "apache reload failed"})),
        );
    }
    (StatusCode::OK, Json(json!({"domain": body["domain"]})))
}

async fn send_email(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.push("email", body);
    Json(json!({"request_id": "r-1", "data": {"succeeded": 1, "failed": 0, "failures": []}}))
}

async fn spawn_services() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/resolve", get(resolve))
        .route("/instances", post(create_instance))
        .route("/instances/{id}", delete(delete_instance))
        .route("/dns", post(change_dns))
        .route("/deploy", post(deploy))
        .route("/email", post(send_email))
        .with_state(recorded.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), recorded)
}

fn http_config(base: &str) -> LaunchpadConfig {
    let mut config = LaunchpadConfig::default();
    config.domain.base_domain = "example.com".to_string();
    config.availability.resolver_url = format!("{base}/resolve");
    config.compute.url = format!("{base}/instances");
    config.dns.endpoint.url = format!("{base}/dns");
    config.deploy.url = format!("{base}/deploy");
    config.notify.url = format!("{base}/email");
    config.notify.api_key = Some("api-123".to_string().into());
    config.notify.sender = "launchpad@example.com".to_string();
    config.notify.extra_recipients = vec!["ops@example.com".to_string()];
    config.validate().unwrap();
    config
}

fn orchestrator(config: &LaunchpadConfig) -> Orchestrator {
    Orchestrator::new(create_collaborators(config).unwrap(), config)
}

#[tokio::test]
async fn full_pipeline_over_http() {
    let (base, recorded) = spawn_services().await;
    let config = http_config(&base);

    let state = orchestrator(&config).run(demo1()).await;

    let result = state.result();
    assert!(result.success, "{result:?}");
    assert_eq!(result.domain.as_deref(), Some("demo1.example.com"));
    assert_eq!(state.resource().instance_id.as_deref(), Some("i-1"));

    let instances = recorded.bodies("instances");
    assert_eq!(
        instances,
        vec![json!({"subdomain": "demo1", "superadminEmail": "c@d.com"})]
    );

    let dns = recorded.bodies("dns");
    assert_eq!(dns.len(), 1);
    assert_eq!(dns[0]["action"], "UPSERT");
    assert_eq!(dns[0]["targetIp"], "1.2.3.4");
    assert_eq!(dns[0]["instanceId"], "i-1");
    assert_eq!(dns[0]["ttl"], 300);

    assert_eq!(
        recorded.bodies("deploy"),
        vec![json!({"domain": "demo1.example.com", "contactEmail": "a@b.com"})]
    );

    let email = recorded.bodies("email");
    assert_eq!(email.len(), 1);
    assert_eq!(email[0]["api_key"], "api-123");
    assert_eq!(email[0]["to"], json!(["a@b.com", "ops@example.com"]));
    assert_eq!(email[0]["sender"], "launchpad@example.com");
    assert_eq!(email[0]["subject"], "Your task manager has been created");
    assert_eq!(
        email[0]["text_body"],
        "A new task manager is live now, please check this URL: https://demo1.example.com"
    );
}

#[tokio::test]
async fn service_error_text_is_echoed_verbatim() {
    let (base, recorded) = spawn_services().await;
    let config = http_config(&base);

    let state = orchestrator(&config)
        .run(RequestBuilder::new("full").build())
        .await;

    let result = state.result();
    assert_eq!(result.step.as_deref(), Some("ProvisionInstance"));
    assert_eq!(result.error.as_deref(), Some("capacity exceeded"));
    assert!(recorded.bodies("dns").is_empty());
}

#[tokio::test]
async fn deploy_failure_compensates_over_http() {
    let (base, recorded) = spawn_services().await;
    let config = http_config(&base);

    let state = orchestrator(&config)
        .run(RequestBuilder::new("broken-deploy").build())
        .await;

    assert!(matches!(
        state.outcome(),
        Outcome::Failed { error, .. }
            if error.kind == ErrorKind::DeployFailed && error.message == "apache reload failed"
    ));

    let dns = recorded.bodies("dns");
    assert_eq!(dns.len(), 2);
    assert_eq!(dns[1]["action"], "DELETE");
    assert_eq!(dns[1]["subdomain"], "broken-deploy");
    assert_eq!(recorded.bodies("instances/delete"), vec![json!("i-1")]);
    assert!(state.compensations().iter().all(|c| c.succeeded));
}

#[tokio::test]
async fn resolver_answers_decide_availability() {
    let (base, _) = spawn_services().await;
    let checker = DohAvailabilityChecker::new(&AvailabilityConfig {
        resolver_url: format!("{base}/resolve"),
        timeout_secs: 5,
    })
    .unwrap();

    let query = |label: &str| AvailabilityQuery {
        subdomain: label.to_string(),
        base_domain: "example.com".to_string(),
    };

    assert!(checker.is_resolvable(&query("taken")).await.unwrap());
    assert!(!checker.is_resolvable(&query("free")).await.unwrap());
    assert!(matches!(
        checker.is_resolvable(&query("broken")).await,
        Err(CollaboratorError::Transport(_))
    ));
}

#[tokio::test]
async fn unreachable_service_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provisioner = HttpComputeProvisioner::new(&EndpointConfig {
        url: format!("http://{addr}/instances"),
        timeout_secs: 5,
    })
    .unwrap();

    let err = provisioner
        .provision(&ProvisionRequest {
            subdomain: "demo1".to_string(),
            admin_email: "c@d.com".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CollaboratorError::Transport(_)));
}

#[tokio::test]
async fn taken_subdomain_over_http_creates_nothing() {
    let (base, recorded) = spawn_services().await;
    let config = http_config(&base);

    let state = orchestrator(&config)
        .run(RequestBuilder::new("taken").build())
        .await;

    assert_eq!(state.result().step.as_deref(), Some("CheckAvailability"));
    assert!(recorded.bodies("instances").is_empty());
}
