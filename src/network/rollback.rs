//! Compensating teardown after a failed build.

use std::fmt;

use tracing::{info, warn};

use crate::compute::RemoteCompute;
use crate::config::FleetConfig;
use crate::fault::{Fault, Phase};
use crate::host::HostController;
use crate::model::{InstanceState, Network};
use crate::security_group::SecurityGroupManager;
use crate::settle::settle;

/// One compensating action.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CompensationStep {
    /// Terminate every owned host.
    TerminateHosts,
    /// Wait for every owned host to reach `Terminated`.
    AwaitHostTermination,
    /// Destroy every owned security group.
    DestroySecurityGroups,
}

impl fmt::Display for CompensationStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::TerminateHosts => "terminate_hosts",
            Self::AwaitHostTermination => "await_host_termination",
            Self::DestroySecurityGroups => "destroy_security_groups",
        })
    }
}

const FULL_TEARDOWN: [CompensationStep; 3] = [
    CompensationStep::TerminateHosts,
    CompensationStep::AwaitHostTermination,
    CompensationStep::DestroySecurityGroups,
];
const GROUP_TEARDOWN: [CompensationStep; 1] = [CompensationStep::DestroySecurityGroups];

/// What a rollback did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RollbackReport {
    /// Steps executed, in order.
    pub steps: Vec<CompensationStep>,
    /// Faults raised by compensation; logged, never escalated.
    pub faults: Vec<Fault>,
}

impl RollbackReport {
    /// Returns `true` when every compensating call succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Decides and runs the compensating teardown for a failed build.
#[derive(Debug)]
pub struct RollbackCoordinator<'a, C: ?Sized> {
    compute: &'a C,
    config: &'a FleetConfig,
}

impl<'a, C: RemoteCompute + ?Sized> RollbackCoordinator<'a, C> {
    /// Borrows the compute capability and configuration.
    #[must_use]
    pub const fn new(compute: &'a C, config: &'a FleetConfig) -> Self {
        Self { compute, config }
    }

    /// Compensating steps for a fault raised in `phase`, in execution
    /// order. Hosts always go before groups; unclassified faults get the
    /// full teardown.
    #[must_use]
    pub const fn plan(phase: Phase) -> &'static [CompensationStep] {
        if phase.touches_hosts() {
            &FULL_TEARDOWN
        } else {
            &GROUP_TEARDOWN
        }
    }

    /// Runs the plan for `phase`. Every step runs even when an earlier one
    /// faulted.
    pub async fn execute(&self, network: &mut Network, phase: Phase) -> RollbackReport {
        let mut report = RollbackReport::default();
        for step in Self::plan(phase) {
            let faults = self.run_step(network, *step).await;
            for fault in &faults {
                warn!(
                    network_id = %network.id,
                    step = %step,
                    entity_id = fault.entity_id(),
                    error = %fault,
                    "compensation failed"
                );
            }
            report.steps.push(*step);
            report.faults.extend(faults);
        }
        info!(
            network_id = %network.id,
            phase = %phase,
            faults = report.faults.len(),
            "rollback finished"
        );
        report
    }

    async fn run_step(&self, network: &mut Network, step: CompensationStep) -> Vec<Fault> {
        let hosts = HostController::new(self.compute, self.config);
        let groups = SecurityGroupManager::new(self.compute);
        let settled = match step {
            CompensationStep::TerminateHosts => {
                settle(network.hosts.iter_mut().map(|host| hosts.terminate(host))).await
            }
            CompensationStep::AwaitHostTermination => {
                settle(
                    network
                        .hosts
                        .iter_mut()
                        .map(|host| hosts.wait_for_state(host, InstanceState::Terminated)),
                )
                .await
            }
            CompensationStep::DestroySecurityGroups => {
                settle(
                    network
                        .security_groups
                        .iter_mut()
                        .map(|group| groups.destroy(group)),
                )
                .await
            }
        };
        settled.into_parts().1
    }
}
