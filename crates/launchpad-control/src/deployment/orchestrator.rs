//! Step interpreter driving a deployment from request to outcome.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::collaborators::{
    AppDeployRequest, AvailabilityQuery, Collaborators, DnsRecordRequest, NotifyRequest,
    ProvisionRequest,
};
use crate::config::LaunchpadConfig;
use crate::error::{ControlResult, ErrorKind, StepError};
use crate::progress::{NoopProgress, ProgressEvent, ProgressSink};
use crate::state::{CompensationRecord, DeploymentState, Step};
use crate::types::{DeploymentId, DeploymentRequest, Subdomain};

use super::compensation::{CompensationStack, Compensator};

/// Per-run values shared by every step.
struct RunContext<'a> {
    request: &'a DeploymentRequest,
    subdomain: Subdomain,
    fqdn: String,
}

/// Runs the provisioning pipeline.
///
/// One orchestrator can drive any number of deployments concurrently; each
/// call to [`run`](Self::run) owns its own [`DeploymentState`] and nothing is
/// shared between runs apart from the collaborators themselves.
pub struct Orchestrator {
    collaborators: Collaborators,
    base_domain: String,
    dns_ttl: u32,
    compensate_on_failure: bool,
    progress: Arc<dyn ProgressSink>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(collaborators: Collaborators, config: &LaunchpadConfig) -> Self {
        Self {
            collaborators,
            base_domain: config
                .domain
                .base_domain
                .trim_matches('.')
                .to_ascii_lowercase(),
            dns_ttl: config.domain.dns_ttl,
            compensate_on_failure: config.orchestrator.compensate_on_failure,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Report progress to `sink` instead of discarding it.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Base domain deployments are published under.
    #[must_use]
    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Run a deployment under a freshly generated ID.
    pub async fn run(&self, request: DeploymentRequest) -> DeploymentState {
        self.run_with_id(DeploymentId::generate(), request).await
    }

    /// Run a deployment to completion.
    ///
    /// The returned state is always terminal. Collaborator failures become
    /// the outcome rather than an `Err`.
    pub async fn run_with_id(&self, id: DeploymentId, request: DeploymentRequest) -> DeploymentState {
        let mut state = DeploymentState::new(id);

        info!(
            deployment_id = %state.id(),
            subdomain = %request.subdomain,
            "starting deployment"
        );
        self.report(&state);

        if let Err(e) = self.drive(&mut state, &request).await {
            error!(deployment_id = %state.id(), error = %e, "deployment state machine violated");
            if !state.is_terminal() {
                let kind = state.step().failure_kind();
                // Only fails if the state is already terminal.
                let _ = state.fail(StepError::new(kind, e.to_string()));
                self.report(&state);
            }
        }

        state
    }

    async fn drive(&self, state: &mut DeploymentState, request: &DeploymentRequest) -> ControlResult<()> {
        let mut undo = CompensationStack::default();

        let subdomain = match Subdomain::parse(&request.subdomain) {
            Ok(subdomain) => subdomain,
            Err(error) => return self.abort(state, error, &mut undo).await,
        };
        let fqdn = subdomain.fqdn(&self.base_domain);
        state.set_domain(fqdn.clone());

        let ctx = RunContext {
            request,
            subdomain,
            fqdn,
        };

        let mut warning = None;
        for step in Step::PIPELINE {
            state.advance(step)?;
            self.report(state);
            debug!(deployment_id = %state.id(), step = %step, "step started");

            match self.execute_step(step, &ctx, state, &mut undo).await {
                Ok(()) => {
                    debug!(deployment_id = %state.id(), step = %step, "step completed");
                }
                Err(error) if step.is_fatal_on_failure() => {
                    return self.abort(state, error, &mut undo).await;
                }
                Err(error) => {
                    warn!(
                        deployment_id = %state.id(),
                        step = %step,
                        error = %error,
                        "non-fatal step failed, continuing"
                    );
                    warning = Some(error);
                }
            }
        }

        state.succeed(warning)?;
        info!(
            deployment_id = %state.id(),
            domain = ctx.fqdn.as_str(),
            "deployment completed successfully"
        );
        self.report(state);
        Ok(())
    }

    /// Perform the collaborator call for `step`.
    ///
    /// On success any undo action is pushed onto `undo` and any discovered
    /// resources are recorded on `state`.
    async fn execute_step(
        &self,
        step: Step,
        ctx: &RunContext<'_>,
        state: &mut DeploymentState,
        undo: &mut CompensationStack,
    ) -> Result<(), StepError> {
        match step {
            Step::Pending => Ok(()),
            Step::CheckingAvailability => self.check_availability(ctx).await,
            Step::Provisioning => {
                let request = ProvisionRequest {
                    subdomain: ctx.subdomain.to_string(),
                    admin_email: ctx.request.admin_email.clone(),
                };
                let instance = self
                    .collaborators
                    .compute
                    .provision(&request)
                    .await
                    .map_err(|e| StepError::from_collaborator(ErrorKind::ProvisioningFailed, e))?;

                info!(
                    deployment_id = %state.id(),
                    instance_id = %instance.instance_id,
                    public_ip = %instance.public_ip,
                    "instance provisioned"
                );
                undo.push(Compensator::ReleaseInstance {
                    instance_id: instance.instance_id.clone(),
                });
                state.record_resource(instance.into());
                Ok(())
            }
            Step::RegisteringDns => {
                let target_ip = state.resource().public_ip.clone().ok_or_else(|| {
                    StepError::new(
                        ErrorKind::DnsFailed,
                        "no public address available for the DNS record",
                    )
                })?;
                let record = DnsRecordRequest {
                    subdomain: ctx.subdomain.to_string(),
                    target_ip,
                    instance_id: state.resource().instance_id.clone(),
                    ttl: self.dns_ttl,
                };
                let published = self
                    .collaborators
                    .dns
                    .upsert(&record)
                    .await
                    .map_err(|e| StepError::from_collaborator(ErrorKind::DnsFailed, e))?;

                if !published.trim_end_matches('.').eq_ignore_ascii_case(&ctx.fqdn) {
                    warn!(
                        deployment_id = %state.id(),
                        expected = ctx.fqdn.as_str(),
                        published = published.as_str(),
                        "registrar published a different domain"
                    );
                }
                info!(
                    deployment_id = %state.id(),
                    domain = ctx.fqdn.as_str(),
                    target_ip = record.target_ip.as_str(),
                    "DNS record published"
                );
                undo.push(Compensator::RemoveDnsRecord { record });
                Ok(())
            }
            Step::Deploying => {
                let request = AppDeployRequest {
                    domain: ctx.fqdn.clone(),
                    contact_email: ctx.request.contact_email.clone(),
                };
                let served = self
                    .collaborators
                    .deployer
                    .deploy(&request)
                    .await
                    .map_err(|e| StepError::from_collaborator(ErrorKind::DeployFailed, e))?;
                info!(deployment_id = %state.id(), domain = served.as_str(), "application deployed");
                Ok(())
            }
            Step::Notifying => {
                let request = NotifyRequest {
                    domain: ctx.fqdn.clone(),
                    recipients: vec![ctx.request.contact_email.clone()],
                };
                self.collaborators
                    .notifier
                    .notify(&request)
                    .await
                    .map_err(|e| StepError::from_collaborator(ErrorKind::NotifyFailed, e))?;
                info!(deployment_id = %state.id(), "completion notice sent");
                Ok(())
            }
        }
    }

    async fn check_availability(&self, ctx: &RunContext<'_>) -> Result<(), StepError> {
        let query = AvailabilityQuery {
            subdomain: ctx.subdomain.to_string(),
            base_domain: self.base_domain.clone(),
        };
        // The checker has no way to reject a name, only to fail to answer.
        let resolvable = self
            .collaborators
            .availability
            .is_resolvable(&query)
            .await
            .map_err(|e| StepError::new(ErrorKind::TransportError, e.message()))?;

        if resolvable {
            return Err(StepError::new(
                ErrorKind::AlreadyInUse,
                format!("subdomain {} is already in use", ctx.fqdn),
            ));
        }
        Ok(())
    }

    /// Undo completed steps if configured, then record the failure.
    async fn abort(
        &self,
        state: &mut DeploymentState,
        error: StepError,
        undo: &mut CompensationStack,
    ) -> ControlResult<()> {
        error!(
            deployment_id = %state.id(),
            step = %state.step(),
            kind = %error.kind,
            error = error.message.as_str(),
            "deployment failed"
        );

        if self.compensate_on_failure {
            self.compensate(state, undo).await;
        } else if !undo.is_empty() {
            warn!(
                deployment_id = %state.id(),
                pending = undo.len(),
                "compensation disabled, leaving allocated resources in place"
            );
        }

        state.fail(error)?;
        self.report(state);
        Ok(())
    }

    /// Run every registered compensator, newest first. Best effort.
    async fn compensate(&self, state: &mut DeploymentState, undo: &mut CompensationStack) {
        while let Some(compensator) = undo.pop() {
            let action = compensator.describe();
            let record = match compensator.run(&self.collaborators).await {
                Ok(()) => {
                    info!(deployment_id = %state.id(), action = action.as_str(), "compensated");
                    CompensationRecord {
                        step: compensator.step(),
                        succeeded: true,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(
                        deployment_id = %state.id(),
                        action = action.as_str(),
                        error = %e,
                        "compensation failed"
                    );
                    CompensationRecord {
                        step: compensator.step(),
                        succeeded: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            state.record_compensation(record);
        }
    }

    fn report(&self, state: &DeploymentState) {
        self.progress.report(ProgressEvent::from_state(state));
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("base_domain", &self.base_domain)
            .field("dns_ttl", &self.dns_ttl)
            .field("compensate_on_failure", &self.compensate_on_failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collaborators::mock::{MockCompute, MockDns};
    use crate::collaborators::MockCollaborators;
    use crate::error::CollaboratorError;

    fn orchestrator(mocks: &MockCollaborators) -> Orchestrator {
        Orchestrator::new(mocks.collaborators(), &LaunchpadConfig::default())
    }

    fn context(request: &DeploymentRequest) -> RunContext<'_> {
        let subdomain = Subdomain::parse(&request.subdomain).unwrap();
        let fqdn = subdomain.fqdn("example.com");
        RunContext {
            request,
            subdomain,
            fqdn,
        }
    }

    fn request() -> DeploymentRequest {
        DeploymentRequest::new("demo1", "a@b.com", "c@d.com")
    }

    #[tokio::test]
    async fn provisioning_records_resource_and_registers_undo() {
        let mocks = MockCollaborators::default();
        let orchestrator = orchestrator(&mocks);
        let request = request();
        let ctx = context(&request);
        let mut state = DeploymentState::new(DeploymentId::new("dep-1"));
        let mut undo = CompensationStack::default();

        orchestrator
            .execute_step(Step::Provisioning, &ctx, &mut state, &mut undo)
            .await
            .unwrap();

        assert!(state.resource().is_provisioned());
        assert_eq!(undo.len(), 1);
        assert_eq!(mocks.compute.requests()[0].admin_email, "c@d.com");
    }

    #[tokio::test]
    async fn dns_without_address_fails_without_calling_registrar() {
        let mocks = MockCollaborators::default();
        let orchestrator = orchestrator(&mocks);
        let request = request();
        let ctx = context(&request);
        let mut state = DeploymentState::new(DeploymentId::new("dep-1"));
        let mut undo = CompensationStack::default();

        let err = orchestrator
            .execute_step(Step::RegisteringDns, &ctx, &mut state, &mut undo)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::DnsFailed);
        assert_eq!(mocks.dns.calls(), 0);
        assert!(undo.is_empty());
    }

    #[tokio::test]
    async fn rejected_dns_keeps_collaborator_text() {
        let mocks = MockCollaborators {
            dns: Arc::new(MockDns::default().failing(CollaboratorError::rejected("zone locked"))),
            ..MockCollaborators::default()
        };
        let orchestrator = orchestrator(&mocks);
        let request = request();
        let ctx = context(&request);
        let mut state = DeploymentState::new(DeploymentId::new("dep-1"));
        let mut undo = CompensationStack::default();

        orchestrator
            .execute_step(Step::Provisioning, &ctx, &mut state, &mut undo)
            .await
            .unwrap();
        let err = orchestrator
            .execute_step(Step::RegisteringDns, &ctx, &mut state, &mut undo)
            .await
            .unwrap_err();

        assert_eq!(err, StepError::new(ErrorKind::DnsFailed, "zone locked"));
        assert_eq!(undo.len(), 1);
    }

    #[tokio::test]
    async fn availability_transport_failure_is_transport_error() {
        let mocks = MockCollaborators {
            availability: Arc::new(
                crate::collaborators::mock::MockAvailability::default()
                    .failing(CollaboratorError::rejected("SERVFAIL")),
            ),
            ..MockCollaborators::default()
        };
        let orchestrator = orchestrator(&mocks);
        let request = request();

        let err = orchestrator
            .check_availability(&context(&request))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportError);
        assert_eq!(err.message, "SERVFAIL");
    }

    #[tokio::test]
    async fn compensation_failure_is_recorded_not_raised() {
        let mocks = MockCollaborators {
            compute: Arc::new(
                MockCompute::default().failing_deprovision(CollaboratorError::transport("timeout")),
            ),
            ..MockCollaborators::default()
        };
        let orchestrator = orchestrator(&mocks);
        let mut state = DeploymentState::new(DeploymentId::new("dep-1"));
        let mut undo = CompensationStack::default();
        undo.push(Compensator::ReleaseInstance {
            instance_id: "i-1".to_owned(),
        });

        orchestrator.compensate(&mut state, &mut undo).await;

        assert_eq!(
            state.compensations(),
            &[CompensationRecord {
                step: Step::Provisioning,
                succeeded: false,
                error: Some("timeout".to_owned()),
            }]
        );
        assert!(undo.is_empty());
    }
}
