//! Compute host record and its settle guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use shell_escape::unix::escape;

use crate::compute::Region;

use super::security_group::SecurityGroup;
use super::state::{InstanceSize, InstanceState};

/// One compute instance's lifecycle record.
///
/// `instance_id` is set iff a real instance was launched for this host.
/// `state` is `None` only before the first create or synchronisation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// Logical identifier; empty until assigned.
    #[serde(default)]
    pub id: String,
    /// Owning network.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Instance type.
    #[serde(default)]
    pub size: InstanceSize,
    /// Region the host lives in.
    #[serde(default)]
    pub region: Option<Region>,
    /// Placement zone.
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Boot image; resolved from the configured name filter when absent.
    #[serde(default)]
    pub image_id: Option<String>,
    /// Logical id of the owning network's security group this host uses.
    #[serde(default)]
    pub security_group_id: Option<String>,
    /// Last known lifecycle state.
    #[serde(default)]
    pub state: Option<InstanceState>,
    /// Provider instance identifier.
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Public IPv4 address.
    #[serde(default)]
    pub ipv4: Option<String>,
    /// Public DNS name.
    #[serde(default)]
    pub public_dns: Option<String>,
    /// Bootstrap script body.
    #[serde(default)]
    pub initial_script: Option<String>,
    #[serde(skip)]
    settle_guard: SettleGuard,
}

impl Host {
    /// Creates a host without an id; the owning network assigns one.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn in_region(mut self, region: impl Into<Region>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = Some(zone.into());
        self
    }

    /// Sets the instance type.
    #[must_use]
    pub const fn sized(mut self, size: InstanceSize) -> Self {
        self.size = size;
        self
    }

    /// Pins the boot image.
    #[must_use]
    pub fn with_image(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    /// References one of the network's security groups.
    #[must_use]
    pub fn with_security_group(mut self, security_group: &SecurityGroup) -> Self {
        self.security_group_id = Some(security_group.id.clone());
        self
    }

    /// Sets the bootstrap script body.
    #[must_use]
    pub fn with_initial_script(mut self, script: impl Into<String>) -> Self {
        self.initial_script = Some(script.into());
        self
    }

    /// Guard preventing concurrent settle routines on this host.
    #[must_use]
    pub const fn settle_guard(&self) -> &SettleGuard {
        &self.settle_guard
    }

    /// Renders the boot script handed to the provider.
    ///
    /// Host and network ids are exported ahead of the user's script so it
    /// can identify itself without querying instance metadata.
    #[must_use]
    pub fn user_data(&self) -> String {
        let network_id = self.network_id.as_deref().unwrap_or_default();
        let mut script = String::from("#!/bin/bash\n");
        for (key, value) in [
            ("NETFLEET_HOST_ID", self.id.as_str()),
            ("NETFLEET_NETWORK_ID", network_id),
        ] {
            script.push_str("export ");
            script.push_str(key);
            script.push('=');
            script.push_str(escape(value.into()).as_ref());
            script.push('\n');
        }
        if let Some(body) = &self.initial_script {
            script.push_str(body);
            if !body.ends_with('\n') {
                script.push('\n');
            }
        }
        script
    }
}

/// Flag shared by every clone of a host record. At most one
/// [`SettlePermit`] exists per guard at a time.
#[derive(Clone, Debug, Default)]
pub struct SettleGuard(Arc<AtomicBool>);

impl SettleGuard {
    /// Takes the guard, or returns `None` when a settle is already running.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SettlePermit> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SettlePermit(Arc::clone(&self.0)))
    }

    /// Returns `true` while a permit is outstanding.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases its [`SettleGuard`] on drop.
#[derive(Debug)]
pub struct SettlePermit(Arc<AtomicBool>);

impl Drop for SettlePermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
