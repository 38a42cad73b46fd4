//! Network aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

use super::host::Host;
use super::new_id;
use super::security_group::SecurityGroup;

/// Named collection of security groups and hosts managed as one unit.
///
/// `running_since` is `None` while the network is only defined and set
/// once live infrastructure exists.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Logical identifier.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Provisioning timestamp.
    #[serde(default)]
    pub running_since: Option<DateTime<Utc>>,
    /// Owned security groups.
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
    /// Owned hosts.
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl Network {
    /// Creates an empty network with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns `true` once live infrastructure exists.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Finds an owned host.
    #[must_use]
    pub fn host(&self, host_id: &str) -> Option<&Host> {
        self.hosts.iter().find(|host| host.id == host_id)
    }

    /// Finds an owned host for mutation.
    pub fn host_mut(&mut self, host_id: &str) -> Option<&mut Host> {
        self.hosts.iter_mut().find(|host| host.id == host_id)
    }

    /// Finds an owned security group.
    #[must_use]
    pub fn security_group(&self, security_group_id: &str) -> Option<&SecurityGroup> {
        self.security_groups
            .iter()
            .find(|group| group.id == security_group_id)
    }

    /// Finds an owned security group for mutation.
    pub fn security_group_mut(&mut self, security_group_id: &str) -> Option<&mut SecurityGroup> {
        self.security_groups
            .iter_mut()
            .find(|group| group.id == security_group_id)
    }
}

impl Document for Network {
    const PREFIX: &'static str = "networks";

    fn document_id(&self) -> &str {
        &self.id
    }
}
