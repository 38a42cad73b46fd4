//! Canonical entity definitions for networks, security groups, and hosts.
//!
//! Entities are created locally (ids are assigned before any remote call),
//! mutated in place by the orchestration components, and persisted as JSON
//! documents. Fields that only exist while infrastructure is live are
//! optional so a document written before provisioning round-trips cleanly.

mod host;
mod network;
mod reconcile;
mod rule;
mod security_group;
mod state;

pub use host::{Host, SettleGuard, SettlePermit};
pub use network::Network;
pub use reconcile::{Reconciled, reconcile};
pub use rule::{Rule, RuleDirection};
pub use security_group::SecurityGroup;
pub use state::{DesiredState, InstanceSize, InstanceState, UnknownInstanceSize};

/// Generates a fresh logical identifier.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests;
