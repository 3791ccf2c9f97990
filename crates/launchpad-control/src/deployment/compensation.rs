//! Undo actions for completed steps.

use crate::collaborators::{CollaboratorResult, Collaborators, DnsRecordRequest};
use crate::state::Step;

/// Reverses the external effect of one completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Compensator {
    /// Release an instance created by the provisioning step.
    ReleaseInstance {
        /// Instance to release.
        instance_id: String,
    },
    /// Delete a record published by the DNS step.
    RemoveDnsRecord {
        /// Record as it was published.
        record: DnsRecordRequest,
    },
}

impl Compensator {
    /// Step whose effect this undoes.
    pub(crate) const fn step(&self) -> Step {
        match self {
            Self::ReleaseInstance { .. } => Step::Provisioning,
            Self::RemoveDnsRecord { .. } => Step::RegisteringDns,
        }
    }

    /// Short description for logs.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::ReleaseInstance { instance_id } => format!("release instance {instance_id}"),
            Self::RemoveDnsRecord { record } => {
                format!("remove DNS record {} -> {}", record.subdomain, record.target_ip)
            }
        }
    }

    pub(crate) async fn run(&self, collaborators: &Collaborators) -> CollaboratorResult<()> {
        match self {
            Self::ReleaseInstance { instance_id } => {
                collaborators.compute.deprovision(instance_id).await
            }
            Self::RemoveDnsRecord { record } => collaborators.dns.remove(record).await,
        }
    }
}

/// Compensators registered so far, undone last-in first-out.
#[derive(Debug, Default)]
pub(crate) struct CompensationStack {
    entries: Vec<Compensator>,
}

impl CompensationStack {
    pub(crate) fn push(&mut self, compensator: Compensator) {
        self.entries.push(compensator);
    }

    pub(crate) fn pop(&mut self) -> Option<Compensator> {
        self.entries.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collaborators::{ComputeProvisioner, MockCollaborators, ProvisionRequest};

    #[test]
    fn stack_pops_in_reverse_order() {
        let mut stack = CompensationStack::default();
        stack.push(Compensator::ReleaseInstance {
            instance_id: "i-1".to_owned(),
        });
        stack.push(Compensator::RemoveDnsRecord {
            record: DnsRecordRequest {
                subdomain: "demo1".to_owned(),
                target_ip: "1.2.3.4".to_owned(),
                instance_id: Some("i-1".to_owned()),
                ttl: 300,
            },
        });

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pop().unwrap().step(), Step::RegisteringDns);
        assert_eq!(stack.pop().unwrap().step(), Step::Provisioning);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn release_instance_calls_deprovision() {
        let mocks = MockCollaborators::default();
        let instance = mocks
            .compute
            .provision(&ProvisionRequest {
                subdomain: "demo1".to_owned(),
                admin_email: "c@d.com".to_owned(),
            })
            .await
            .unwrap();

        let compensator = Compensator::ReleaseInstance {
            instance_id: instance.instance_id.clone(),
        };
        compensator.run(&mocks.collaborators()).await.unwrap();

        assert!(mocks.compute.running().is_empty());
        assert_eq!(mocks.compute.released(), vec![instance.instance_id]);
    }
}
