//! Logical security group replicated as one real group per region.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compute::Region;

use super::rule::{Rule, RuleDirection};

/// Logical firewall rule set.
///
/// `real_security_groups` maps each region to the provider-assigned group
/// id and is only populated while the group is live.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    /// Logical identifier; empty until assigned.
    #[serde(default)]
    pub id: String,
    /// Group name, shared by every real group.
    pub name: String,
    /// Owning network.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Inbound rules in insertion order.
    #[serde(default)]
    pub inbound: Vec<Rule>,
    /// Outbound rules in insertion order.
    #[serde(default)]
    pub outbound: Vec<Rule>,
    /// Region to real group id.
    #[serde(default)]
    pub real_security_groups: BTreeMap<Region, String>,
    /// Set once real groups exist.
    #[serde(default)]
    pub running_since: Option<DateTime<Utc>>,
}

impl SecurityGroup {
    /// Creates a group without an id; the owning network assigns one.
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

    /// Appends an inbound rule.
    #[must_use]
    pub fn with_inbound(mut self, rule: Rule) -> Self {
        self.inbound.push(rule);
        self
    }

    /// Appends an outbound rule.
    #[must_use]
    pub fn with_outbound(mut self, rule: Rule) -> Self {
        self.outbound.push(rule);
        self
    }

    /// Returns `true` while real groups are meant to exist.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Real group id for `region`, if recorded.
    #[must_use]
    pub fn real_group(&self, region: &Region) -> Option<&str> {
        self.real_security_groups.get(region).map(String::as_str)
    }

    /// Returns `true` when `group_id` is the recorded real group of any
    /// region.
    #[must_use]
    pub fn owns_real_group(&self, group_id: &str) -> bool {
        self.real_security_groups
            .values()
            .any(|recorded| recorded == group_id)
    }

    /// Rules for one direction.
    #[must_use]
    pub fn rules(&self, direction: RuleDirection) -> &[Rule] {
        match direction {
            RuleDirection::Inbound => &self.inbound,
            RuleDirection::Outbound => &self.outbound,
        }
    }

    /// Mutable rules for one direction.
    pub const fn rules_mut(&mut self, direction: RuleDirection) -> &mut Vec<Rule> {
        match direction {
            RuleDirection::Inbound => &mut self.inbound,
            RuleDirection::Outbound => &mut self.outbound,
        }
    }

    /// Clears live state after teardown.
    pub fn mark_stopped(&mut self) {
        self.real_security_groups.clear();
        self.running_since = None;
    }
}
