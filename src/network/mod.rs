//! Aggregate lifecycle of a network.
//!
//! [`NetworkOrchestrator`] owns the compute capability, the document store,
//! and the configuration. It builds networks in four phases (security
//! groups, their synchronisation, hosts, their synchronisation), tears them
//! down hosts-first, and converges persisted snapshots against live state
//! on every read of a running network.

mod rollback;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::compute::RemoteCompute;
use crate::config::FleetConfig;
use crate::fault::{Fault, Phase, PhaseFault};
use crate::host::{CommandOutcome, HostController};
use crate::model::{
    DesiredState, Host, InstanceState, Network, Rule, RuleDirection, SecurityGroup, new_id,
};
use crate::security_group::SecurityGroupManager;
use crate::settle::settle;
use crate::store::{DocumentStore, KeyValueStore};

pub use rollback::{CompensationStep, RollbackCoordinator, RollbackReport};

/// Result of [`NetworkOrchestrator::build`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildOutcome {
    /// Every phase succeeded and the network is running.
    Built,
    /// A phase failed; compensation ran and the network is not running.
    RolledBack {
        /// Fault that aborted the build.
        fault: PhaseFault,
        /// What the compensation did.
        report: RollbackReport,
    },
}

/// Result of a lenient synchronisation pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncSummary {
    /// Members synchronised successfully.
    pub synchronized: usize,
    /// Faults of the members that failed; already logged.
    pub failures: Vec<Fault>,
}

impl SyncSummary {
    fn from_outcomes<T>(outcomes: Vec<Result<T, Fault>>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                Ok(_) => summary.synchronized += 1,
                Err(fault) => summary.failures.push(fault),
            }
        }
        summary
    }

    /// Returns `true` when every member synchronised.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn find_group<'g>(groups: &'g [SecurityGroup], host: &Host) -> Result<&'g SecurityGroup, Fault> {
    host.security_group_id
        .as_deref()
        .and_then(|group_id| groups.iter().find(|group| group.id == group_id))
        .ok_or_else(|| Fault::MissingPrecondition {
            entity_id: host.id.clone(),
            field: "security_group",
        })
}

/// Coordinates a network's provisioning, teardown, and synchronisation.
#[derive(Debug)]
pub struct NetworkOrchestrator<C, S> {
    compute: C,
    documents: DocumentStore<S>,
    config: FleetConfig,
}

impl<C: RemoteCompute, S: KeyValueStore> NetworkOrchestrator<C, S> {
    /// Wires the orchestrator to its collaborators.
    #[must_use]
    pub fn new(compute: C, store: S, config: FleetConfig) -> Self {
        let documents = DocumentStore::new(store, config.document_extension.clone());
        Self {
            compute,
            documents,
            config,
        }
    }

    /// Borrows the compute capability.
    #[must_use]
    pub const fn compute(&self) -> &C {
        &self.compute
    }

    /// Borrows the document store.
    #[must_use]
    pub const fn documents(&self) -> &DocumentStore<S> {
        &self.documents
    }

    fn security_groups(&self) -> SecurityGroupManager<'_, C> {
        SecurityGroupManager::new(&self.compute)
    }

    fn hosts(&self) -> HostController<'_, C> {
        HostController::new(&self.compute, &self.config)
    }

    /// Persists the network snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Store`] when the write fails.
    pub async fn save(&self, network: &Network) -> Result<(), Fault> {
        self.documents.save(network).await
    }

    async fn save_best_effort(&self, network: &Network) {
        if let Err(fault) = self.save(network).await {
            warn!(network_id = %network.id, error = %fault, "failed to persist network");
        }
    }

    /// Provisions every member of a defined network.
    ///
    /// A fault in any phase aborts the remaining phases, runs the
    /// compensating teardown, and is returned inside
    /// [`BuildOutcome::RolledBack`] rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AlreadyRunning`] for a live network,
    /// [`Fault::MissingPrecondition`] for a network without an id, and
    /// [`Fault::Store`] when the built network cannot be persisted.
    pub async fn build(&self, network: &mut Network) -> Result<BuildOutcome, Fault> {
        if network.is_running() {
            return Err(Fault::AlreadyRunning {
                entity_id: network.id.clone(),
            });
        }
        if network.id.trim().is_empty() {
            return Err(Fault::MissingPrecondition {
                entity_id: network.name.clone(),
                field: "id",
            });
        }
        adopt_members(network);
        info!(
            network_id = %network.id,
            security_groups = network.security_groups.len(),
            hosts = network.hosts.len(),
            "building network"
        );

        match self.provision(network).await {
            Ok(()) => {
                network.running_since = Some(Utc::now());
                self.save(network).await?;
                info!(network_id = %network.id, "network built");
                Ok(BuildOutcome::Built)
            }
            Err(fault) => {
                warn!(
                    network_id = %network.id,
                    phase = %fault.phase,
                    code = fault.fault.code(),
                    entity_id = fault.fault.entity_id(),
                    error = %fault.fault,
                    "build failed; rolling back"
                );
                let report = RollbackCoordinator::new(&self.compute, &self.config)
                    .execute(network, fault.phase)
                    .await;
                self.save_best_effort(network).await;
                Ok(BuildOutcome::RolledBack { fault, report })
            }
        }
    }

    async fn provision(&self, network: &mut Network) -> Result<(), PhaseFault> {
        let groups = self.security_groups();
        settle(
            network
                .security_groups
                .iter_mut()
                .map(|group| groups.create(group)),
        )
        .await
        .into_result()?;
        debug!(network_id = %network.id, "security groups created");

        settle(
            network
                .security_groups
                .iter_mut()
                .map(|group| groups.transform_from_aws(group)),
        )
        .await
        .into_result()
        .map_err(|fault| fault.into_sync_failure().in_phase(Phase::SecurityGroupSync))?;

        let owned_groups = &network.security_groups;
        settle(
            network
                .hosts
                .iter_mut()
                .map(|host| self.create_member_host(host, owned_groups)),
        )
        .await
        .into_result()?;
        debug!(network_id = %network.id, "hosts created");

        let hosts = self.hosts();
        settle(
            network
                .hosts
                .iter_mut()
                .map(|host| hosts.transform_from_aws(host, owned_groups)),
        )
        .await
        .into_result()
        .map(|_| ())
        .map_err(|fault| fault.into_sync_failure().in_phase(Phase::HostSync))
    }

    async fn create_member_host(
        &self,
        host: &mut Host,
        groups: &[SecurityGroup],
    ) -> Result<(), PhaseFault> {
        let group = find_group(groups, host).map_err(|fault| fault.in_phase(Phase::HostCreate))?;
        self.hosts().create(host, group).await
    }

    /// Re-synchronises every security group. Member faults are logged and
    /// reported, never raised.
    pub async fn synchronize_security_groups(&self, network: &mut Network) -> SyncSummary {
        let groups = self.security_groups();
        let outcomes = settle(
            network
                .security_groups
                .iter_mut()
                .map(|group| groups.transform_from_aws(group)),
        )
        .await
        .into_outcomes();
        let summary = SyncSummary::from_outcomes(outcomes);
        for fault in &summary.failures {
            warn!(
                network_id = %network.id,
                security_group_id = fault.entity_id(),
                error = %fault,
                "security group synchronisation failed"
            );
        }
        summary
    }

    /// Re-synchronises every host. Member faults are logged and reported,
    /// never raised.
    pub async fn synchronize_hosts(&self, network: &mut Network) -> SyncSummary {
        let hosts = self.hosts();
        let groups = &network.security_groups;
        let outcomes = settle(
            network
                .hosts
                .iter_mut()
                .map(|host| hosts.transform_from_aws(host, groups)),
        )
        .await
        .into_outcomes();
        let summary = SyncSummary::from_outcomes(outcomes);
        for fault in &summary.failures {
            warn!(
                network_id = %network.id,
                host_id = fault.entity_id(),
                error = %fault,
                "host synchronisation failed"
            );
        }
        summary
    }

    /// Adds a host. A running network provisions it at once and
    /// re-synchronises its hosts. The network is persisted either way.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::DuplicateMember`] without touching the network when
    /// the id is taken, the provisioning fault when launching fails (the
    /// host stays a member), and [`Fault::Store`] when persisting fails.
    pub async fn add_host(&self, network: &mut Network, mut host: Host) -> Result<String, Fault> {
        if !host.id.is_empty() && network.host(&host.id).is_some() {
            return Err(Fault::DuplicateMember {
                entity_id: host.id,
                network_id: network.id.clone(),
            });
        }
        if host.id.is_empty() {
            host.id = new_id();
        }
        host.network_id = Some(network.id.clone());
        let host_id = host.id.clone();
        network.hosts.push(host);
        info!(network_id = %network.id, host_id = %host_id, "host added");

        let mut provisioning = Ok(());
        if network.is_running() {
            provisioning = self.provision_host(network, &host_id).await;
            self.synchronize_hosts(network).await;
        }
        self.save(network).await?;
        provisioning.map(|()| host_id)
    }

    async fn provision_host(&self, network: &mut Network, host_id: &str) -> Result<(), Fault> {
        let owned_groups = &network.security_groups;
        let Some(host) = network.hosts.iter_mut().find(|host| host.id == host_id) else {
            return Ok(());
        };
        let result = match find_group(owned_groups, host) {
            Ok(group) => self
                .hosts()
                .create(host, group)
                .await
                .map_err(|fault| fault.fault),
            Err(fault) => Err(fault),
        };
        if let Err(fault) = &result {
            warn!(host_id = %host_id, error = %fault, "provisioning added host failed");
        }
        result
    }

    /// Adds a security group. A running network provisions it at once and
    /// re-synchronises its groups. The network is persisted either way.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::DuplicateMember`] without touching the network when
    /// the id is taken, the provisioning fault when creation fails (the
    /// group stays a member), and [`Fault::Store`] when persisting fails.
    pub async fn add_security_group(
        &self,
        network: &mut Network,
        mut group: SecurityGroup,
    ) -> Result<String, Fault> {
        if !group.id.is_empty() && network.security_group(&group.id).is_some() {
            return Err(Fault::DuplicateMember {
                entity_id: group.id,
                network_id: network.id.clone(),
            });
        }
        if group.id.is_empty() {
            group.id = new_id();
        }
        group.network_id = Some(network.id.clone());
        let group_id = group.id.clone();
        network.security_groups.push(group);
        info!(network_id = %network.id, security_group_id = %group_id, "security group added");

        let mut provisioning = Ok(());
        if network.is_running()
            && let Some(group) = network.security_group_mut(&group_id)
        {
            provisioning = self
                .security_groups()
                .create(group)
                .await
                .map_err(|fault| fault.fault);
            if let Err(fault) = &provisioning {
                warn!(security_group_id = %group_id, error = %fault, "provisioning added security group failed");
            }
            self.synchronize_security_groups(network).await;
        }
        self.save(network).await?;
        provisioning.map(|()| group_id)
    }

    /// Tears a network down and removes its document.
    ///
    /// A running network first terminates every host, then waits for each
    /// to reach `Terminated`, then destroys every security group; each
    /// phase drains before the next begins.
    ///
    /// # Errors
    ///
    /// Returns the first fault of a failed phase. The document is then kept
    /// (with the current snapshot) so it still points at live resources.
    pub async fn delete(&self, network: &mut Network) -> Result<(), Fault> {
        if network.is_running() {
            if let Err(fault) = self.teardown(network).await {
                warn!(network_id = %network.id, error = %fault, "teardown failed; keeping document");
                self.save_best_effort(network).await;
                return Err(fault);
            }
            network.running_since = None;
        }
        self.documents.remove::<Network>(&network.id).await?;
        info!(network_id = %network.id, "network deleted");
        Ok(())
    }

    async fn teardown(&self, network: &mut Network) -> Result<(), Fault> {
        let hosts = self.hosts();
        settle(network.hosts.iter_mut().map(|host| hosts.terminate(host)))
            .await
            .into_result()?;
        settle(
            network
                .hosts
                .iter_mut()
                .map(|host| hosts.wait_for_state(host, InstanceState::Terminated)),
        )
        .await
        .into_result()?;
        let groups = self.security_groups();
        settle(
            network
                .security_groups
                .iter_mut()
                .map(|group| groups.destroy(group)),
        )
        .await
        .into_result()
        .map(|_| ())
    }

    /// Loads a network. A running network is synchronised (groups, then
    /// hosts) and re-persisted before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] when no document exists and
    /// [`Fault::Store`] when loading or persisting fails.
    pub async fn get(&self, network_id: &str) -> Result<Network, Fault> {
        let mut network: Network = self.documents.load(network_id).await?;
        if network.is_running() {
            self.synchronize_security_groups(&mut network).await;
            self.synchronize_hosts(&mut network).await;
            self.save(&network).await?;
        }
        Ok(network)
    }

    /// Loads every persisted network as stored, without synchronising.
    /// Unreadable documents are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::Store`] when the keys cannot be listed.
    pub async fn list(&self) -> Result<Vec<Network>, Fault> {
        let ids = self.documents.list_ids::<Network>().await?;
        let (networks, failures) = settle(
            ids.iter()
                .map(|network_id| self.documents.load::<Network>(network_id)),
        )
        .await
        .into_parts();
        for fault in &failures {
            warn!(network_id = fault.entity_id(), error = %fault, "skipping unreadable network");
        }
        Ok(networks)
    }

    /// Changes one host's state and persists the network. State-change
    /// faults are logged, not raised.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] for an unknown host and
    /// [`Fault::Store`] when persisting fails.
    pub async fn change_host_state(
        &self,
        network: &mut Network,
        host_id: &str,
        desired: DesiredState,
    ) -> Result<(), Fault> {
        let controller = self.hosts();
        let host = network
            .host_mut(host_id)
            .ok_or_else(|| Fault::ResourceNotFound {
                entity_id: host_id.to_owned(),
                resource: String::from("host"),
            })?;
        controller.change_state(host, desired).await;
        self.save(network).await
    }

    /// Runs a shell script on one host.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] for an unknown host and any
    /// fault raised by the command itself.
    pub async fn send_command(
        &self,
        network: &Network,
        host_id: &str,
        commands: &[String],
        silent: bool,
    ) -> Result<CommandOutcome, Fault> {
        let host = network
            .host(host_id)
            .ok_or_else(|| Fault::ResourceNotFound {
                entity_id: host_id.to_owned(),
                resource: String::from("host"),
            })?;
        self.hosts().send_command(host, commands, silent).await
    }

    /// Adds a rule to one security group and persists the network.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] for an unknown group, any
    /// replication fault (after persisting), and [`Fault::Store`].
    pub async fn add_rule(
        &self,
        network: &mut Network,
        security_group_id: &str,
        direction: RuleDirection,
        rule: Rule,
    ) -> Result<bool, Fault> {
        let manager = self.security_groups();
        let group = member_group(network, security_group_id)?;
        let result = manager.add_rule(group, direction, rule).await;
        self.save(network).await?;
        result
    }

    /// Removes a rule from one security group and persists the network.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] for an unknown group, any
    /// revocation fault (after persisting), and [`Fault::Store`].
    pub async fn remove_rule(
        &self,
        network: &mut Network,
        security_group_id: &str,
        direction: RuleDirection,
        rule: &Rule,
    ) -> Result<bool, Fault> {
        let manager = self.security_groups();
        let group = member_group(network, security_group_id)?;
        let result = manager.remove_rule(group, direction, rule).await;
        self.save(network).await?;
        result
    }
}

fn member_group<'n>(
    network: &'n mut Network,
    security_group_id: &str,
) -> Result<&'n mut SecurityGroup, Fault> {
    network
        .security_group_mut(security_group_id)
        .ok_or_else(|| Fault::ResourceNotFound {
            entity_id: security_group_id.to_owned(),
            resource: String::from("security_group"),
        })
}

/// Assigns missing member ids and back-references before provisioning.
fn adopt_members(network: &mut Network) {
    for group in &mut network.security_groups {
        if group.id.is_empty() {
            group.id = new_id();
        }
        group.network_id = Some(network.id.clone());
    }
    for host in &mut network.hosts {
        if host.id.is_empty() {
            host.id = new_id();
        }
        host.network_id = Some(network.id.clone());
    }
}
