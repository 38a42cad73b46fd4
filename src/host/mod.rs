//! Lifecycle of a single compute host.
//!
//! [`HostController`] launches the instance, drives start/stop/terminate
//! through optimistic local states, and settles those states against the
//! provider's wait primitive. A host's [`SettleGuard`] keeps two settle
//! routines from blocking on the same instance.
//!
//! [`SettleGuard`]: crate::model::SettleGuard

mod command;
mod sync;

use tracing::{debug, info, warn};

use crate::compute::{
    LaunchSpec, Region, RemoteCompute, TAG_ID, TAG_NAME, TAG_NETWORK_ID, TAG_SECURITY_GROUP_ID,
    Tag,
};
use crate::config::FleetConfig;
use crate::fault::{Fault, Phase, PhaseFault};
use crate::model::{DesiredState, Host, InstanceState, SecurityGroup};

pub use command::{CommandOutcome, StreamEvent};
pub use sync::SyncReport;

fn host_label(host: &Host) -> String {
    if host.id.is_empty() {
        host.name.clone()
    } else {
        host.id.clone()
    }
}

fn require_region(host: &Host) -> Result<Region, Fault> {
    host.region.clone().ok_or_else(|| Fault::MissingPrecondition {
        entity_id: host_label(host),
        field: "region",
    })
}

fn require_instance(host: &Host) -> Result<String, Fault> {
    host.instance_id
        .clone()
        .ok_or_else(|| Fault::MissingPrecondition {
            entity_id: host_label(host),
            field: "instance_id",
        })
}

/// Drives one host against the compute provider.
#[derive(Debug)]
pub struct HostController<'a, C: ?Sized> {
    compute: &'a C,
    config: &'a FleetConfig,
}

impl<'a, C: RemoteCompute + ?Sized> HostController<'a, C> {
    /// Borrows the compute capability and configuration.
    #[must_use]
    pub const fn new(compute: &'a C, config: &'a FleetConfig) -> Self {
        Self { compute, config }
    }

    /// Launches the instance, attaches the execution profile, and settles
    /// the host into `Running`.
    ///
    /// # Errors
    ///
    /// Returns a [`Phase::HostCreate`] fault for missing preconditions or a
    /// failed launch, and a [`Phase::ProfileAttach`] fault when the
    /// instance never becomes attachable.
    pub async fn create(&self, host: &mut Host, group: &SecurityGroup) -> Result<(), PhaseFault> {
        let launch = |fault: Fault| fault.in_phase(Phase::HostCreate);
        if host.id.trim().is_empty() {
            return Err(launch(Fault::MissingPrecondition {
                entity_id: host.name.clone(),
                field: "id",
            }));
        }
        let region = require_region(host).map_err(launch)?;
        let group_id = group
            .real_group(&region)
            .ok_or_else(|| Fault::MissingPrecondition {
                entity_id: host.id.clone(),
                field: "security_group",
            })
            .map_err(launch)?
            .to_owned();
        let image_id = self.resolve_image(host, &region).await.map_err(launch)?;

        let mut tags = vec![Tag::new(TAG_NAME, &host.name)];
        if let Some(network_id) = &host.network_id {
            tags.push(Tag::new(TAG_NETWORK_ID, network_id));
        }
        tags.push(Tag::new(TAG_SECURITY_GROUP_ID, &group.id));
        tags.push(Tag::new(TAG_ID, &host.id));
        let spec = LaunchSpec {
            image_id,
            size: host.size,
            key_name: self.config.key_name.clone(),
            security_group_ids: vec![group_id],
            tags,
            user_data: host.user_data(),
            availability_zone: host.availability_zone.clone(),
        };

        let instance_id = self
            .compute
            .run_instance(&region, &spec)
            .await
            .map_err(|err| launch(Fault::remote(&host.id, err)))?;
        info!(host_id = %host.id, region = %region, instance_id = %instance_id, "instance launched");
        host.instance_id = Some(instance_id.clone());
        host.security_group_id = Some(group.id.clone());
        host.state = Some(InstanceState::Pending);

        let attach = |err| Fault::remote(&host.id, err).in_phase(Phase::ProfileAttach);
        self.compute
            .wait_for_instance_state(&region, &instance_id, InstanceState::Running)
            .await
            .map_err(attach)?;
        self.compute
            .attach_instance_profile(&region, &instance_id, &self.config.instance_profile_name)
            .await
            .map_err(attach)?;
        debug!(host_id = %host.id, profile = %self.config.instance_profile_name, "instance profile attached");

        self.manage_state(host).await.map_err(launch)
    }

    async fn resolve_image(&self, host: &mut Host, region: &Region) -> Result<String, Fault> {
        if let Some(image_id) = &host.image_id {
            return Ok(image_id.clone());
        }
        let image_id = self
            .compute
            .describe_image(region, &self.config.image_name)
            .await
            .map_err(|err| Fault::remote(&host.id, err))?
            .ok_or_else(|| Fault::MissingPrecondition {
                entity_id: host.id.clone(),
                field: "image",
            })?;
        debug!(host_id = %host.id, image_id = %image_id, "image resolved");
        host.image_id = Some(image_id.clone());
        Ok(image_id)
    }

    /// Requests a state change. Faults are logged and swallowed; the
    /// outcome is observed through synchronisation.
    pub async fn change_state(&self, host: &mut Host, desired: DesiredState) {
        let result = match desired {
            DesiredState::Running => self.turn_on(host).await,
            DesiredState::Stopped => self.turn_off(host).await,
            DesiredState::Terminated => self.terminate(host).await,
        };
        if let Err(fault) = result {
            warn!(host_id = %host.id, desired = ?desired, code = fault.code(), error = %fault, "state change failed");
        }
    }

    /// Starts the instance and settles it into `Running`.
    ///
    /// # Errors
    ///
    /// Returns a fault when the host has no instance or the provider fails.
    pub async fn turn_on(&self, host: &mut Host) -> Result<(), Fault> {
        let region = require_region(host)?;
        let instance_id = require_instance(host)?;
        host.state = Some(InstanceState::Pending);
        self.compute
            .start_instance(&region, &instance_id)
            .await
            .map_err(|err| Fault::remote(&host.id, err))?;
        self.manage_state(host).await
    }

    /// Stops the instance and settles it into `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns a fault when the host has no instance or the provider fails.
    pub async fn turn_off(&self, host: &mut Host) -> Result<(), Fault> {
        let region = require_region(host)?;
        let instance_id = require_instance(host)?;
        host.state = Some(InstanceState::Stopping);
        self.compute
            .stop_instance(&region, &instance_id)
            .await
            .map_err(|err| Fault::remote(&host.id, err))?;
        self.manage_state(host).await
    }

    /// Terminates the instance and settles it into `Terminated`.
    ///
    /// A host whose instance id was lost is re-discovered through its `Id`
    /// tag; a host that never launched, or has no region to launch in, is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns a fault when the provider fails.
    pub async fn terminate(&self, host: &mut Host) -> Result<(), Fault> {
        if host.instance_id.is_none() && host.region.is_none() {
            debug!(host_id = %host.id, "never launched; nothing to terminate");
            return Ok(());
        }
        let region = require_region(host)?;
        if host.instance_id.is_none() {
            match self.locate(host, &region).await? {
                Some(found) => {
                    warn!(host_id = %host.id, instance_id = %found.instance_id, "re-discovered instance by tag");
                    host.instance_id = Some(found.instance_id);
                }
                None => {
                    debug!(host_id = %host.id, "no instance to terminate");
                    return Ok(());
                }
            }
        }
        let instance_id = require_instance(host)?;
        host.state = Some(InstanceState::ShuttingDown);
        match self.compute.terminate_instance(&region, &instance_id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                warn!(host_id = %host.id, instance_id = %instance_id, "instance already gone");
                host.state = Some(InstanceState::Terminated);
                return Ok(());
            }
            Err(err) => return Err(Fault::remote(&host.id, err)),
        }
        info!(host_id = %host.id, instance_id = %instance_id, "termination requested");
        self.manage_state(host).await
    }

    /// Settles a transitional state.
    ///
    /// Returns at once when the host has no instance, the instance no
    /// longer exists, or another settle already holds the host's guard.
    /// Otherwise waits until the provider reports the state the local
    /// optimistic state settles into, then commits it.
    ///
    /// # Errors
    ///
    /// Returns a fault when the existence check or the wait fails.
    pub async fn manage_state(&self, host: &mut Host) -> Result<(), Fault> {
        let Some(instance_id) = host.instance_id.clone() else {
            debug!(host_id = %host.id, "nothing to settle without an instance");
            return Ok(());
        };
        let region = require_region(host)?;
        let Some(live) = self
            .compute
            .describe_instance(&region, &instance_id)
            .await
            .map_err(|err| Fault::remote(&host.id, err))?
        else {
            warn!(host_id = %host.id, instance_id = %instance_id, "instance vanished before settling");
            return Ok(());
        };
        let Some(_permit) = host.settle_guard().try_acquire() else {
            debug!(host_id = %host.id, "settle already in progress");
            return Ok(());
        };

        let target = host
            .state
            .and_then(InstanceState::settles_into)
            .or_else(|| live.state.and_then(InstanceState::settles_into));
        let Some(target) = target else {
            if live.state.is_some() {
                host.state = live.state;
            }
            return Ok(());
        };

        self.compute
            .wait_for_instance_state(&region, &instance_id, target)
            .await
            .map_err(|err| Fault::remote(&host.id, err))?;
        host.state = Some(target);
        info!(host_id = %host.id, state = %target, "host settled");
        Ok(())
    }

    /// Waits until the instance reports `target`. A host without an
    /// instance, or whose instance is gone, is already there.
    ///
    /// # Errors
    ///
    /// Returns a fault when the provider fails.
    pub async fn wait_for_state(&self, host: &mut Host, target: InstanceState) -> Result<(), Fault> {
        let Some(instance_id) = host.instance_id.clone() else {
            return Ok(());
        };
        let region = require_region(host)?;
        let exists = self
            .compute
            .describe_instance(&region, &instance_id)
            .await
            .map_err(|err| Fault::remote(&host.id, err))?
            .is_some();
        if exists {
            self.compute
                .wait_for_instance_state(&region, &instance_id, target)
                .await
                .map_err(|err| Fault::remote(&host.id, err))?;
        }
        host.state = Some(target);
        Ok(())
    }
}
