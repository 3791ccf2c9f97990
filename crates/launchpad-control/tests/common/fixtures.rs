//! Test fixtures for launchpad integration tests.

use std::sync::Mutex;

use launchpad_control::collaborators::ProvisionedInstance;
use launchpad_control::{DeploymentRequest, ProgressEvent, ProgressSink, Step};

/// Builder for creating test deployment requests.
pub struct RequestBuilder {
    subdomain: String,
    contact_email: String,
    admin_email: String,
}

impl RequestBuilder {
    /// Creates a new request builder for the given subdomain.
    pub fn new(subdomain: &str) -> Self {
        Self {
            subdomain: subdomain.to_string(),
            contact_email: "a@b.com".to_string(),
            admin_email: "c@d.com".to_string(),
        }
    }

    /// Sets the contact email.
    pub fn with_contact(mut self, email: &str) -> Self {
        self.contact_email = email.to_string();
        self
    }

    /// Sets the administrator email.
    pub fn with_admin(mut self, email: &str) -> Self {
        self.admin_email = email.to_string();
        self
    }

    /// Builds the request.
    pub fn build(self) -> DeploymentRequest {
        DeploymentRequest::new(self.subdomain, self.contact_email, self.admin_email)
    }
}

/// The request from the reference scenario.
pub fn demo1() -> DeploymentRequest {
    RequestBuilder::new("demo1").build()
}

/// The instance from the reference scenario.
pub fn demo1_instance() -> ProvisionedInstance {
    ProvisionedInstance {
        instance_id: "i-1".to_string(),
        public_ip: "1.2.3.4".to_string(),
        public_dns: "ec2-1-2-3-4.example.com".to_string(),
    }
}

/// Progress sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    /// All events received, oldest first.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Steps of the events received, oldest first.
    pub fn steps(&self) -> Vec<Step> {
        self.events().iter().map(|e| e.step).collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
