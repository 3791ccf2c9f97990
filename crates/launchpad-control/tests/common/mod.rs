//! Common test utilities for launchpad integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use launchpad_control::api::AppState;
use launchpad_control::collaborators::MockCollaborators;
use launchpad_control::config::{CollaboratorMode, LaunchpadConfig};
use launchpad_control::Orchestrator;

use fixtures::RecordingProgress;

/// Base domain used by every test deployment.
pub const BASE_DOMAIN: &str = "example.com";

/// Mock collaborators, configuration and a progress recorder wired together.
pub struct TestLaunchpad {
    pub mocks: MockCollaborators,
    pub config: LaunchpadConfig,
    pub progress: Arc<RecordingProgress>,
}

impl TestLaunchpad {
    /// Creates a setup where every collaborator succeeds.
    pub fn new() -> Self {
        Self::with_mocks(MockCollaborators::default())
    }

    /// Creates a setup around pre-configured mocks.
    pub fn with_mocks(mocks: MockCollaborators) -> Self {
        let mut config = LaunchpadConfig::default();
        config.collaborators.mode = CollaboratorMode::Mock;
        config.domain.base_domain = BASE_DOMAIN.to_owned();

        Self {
            mocks,
            config,
            progress: Arc::new(RecordingProgress::default()),
        }
    }

    /// Leave completed steps in place when a later one fails.
    pub fn without_compensation(mut self) -> Self {
        self.config.orchestrator.compensate_on_failure = false;
        self
    }

    /// Builds an orchestrator reporting into `self.progress`.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.mocks.collaborators(), &self.config)
            .with_progress(self.progress.clone())
    }

    /// Builds API state over the same mocks.
    pub fn app_state(&self) -> AppState {
        AppState::new(self.mocks.collaborators(), &self.config)
    }
}

impl Default for TestLaunchpad {
    fn default() -> Self {
        Self::new()
    }
}
