//! Fault taxonomy surfaced by the orchestration components.
//!
//! Every fault carries the id of the entity it concerns and a stable
//! snake_case [`Fault::code`] so callers can render `code` plus id without
//! matching on variants.

use std::fmt;

use thiserror::Error;

use crate::compute::ComputeError;
use crate::store::StoreError;

/// Orchestration fault.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Fault {
    /// A required field is absent.
    #[error("{entity_id} is missing {field}")]
    MissingPrecondition {
        /// Entity lacking the field.
        entity_id: String,
        /// Name of the absent field.
        field: &'static str,
    },
    /// Build requested on a live network.
    #[error("network {entity_id} is already running")]
    AlreadyRunning {
        /// Network id.
        entity_id: String,
    },
    /// Member id collides with an existing member of the network.
    #[error("{entity_id} is already a member of network {network_id}")]
    DuplicateMember {
        /// Colliding member id.
        entity_id: String,
        /// Owning network id.
        network_id: String,
    },
    /// Remote or persisted entity vanished.
    #[error("{resource} {entity_id} not found")]
    ResourceNotFound {
        /// Entity that could not be found.
        entity_id: String,
        /// Kind of resource looked up.
        resource: String,
    },
    /// Remote entity exists already.
    #[error("{resource} {entity_id} already exists")]
    ResourceAlreadyExists {
        /// Entity that collided.
        entity_id: String,
        /// Kind of resource created.
        resource: String,
    },
    /// Generic provider failure.
    #[error("{operation} failed for {entity_id}: {message}")]
    RemoteOperationFailed {
        /// Entity the call was made for.
        entity_id: String,
        /// Provider operation.
        operation: String,
        /// Provider message.
        message: String,
    },
    /// Polling attempt ceiling exceeded.
    #[error("{operation} for {entity_id} did not finish after {attempts} attempts")]
    Timeout {
        /// Entity being polled.
        entity_id: String,
        /// Operation being polled.
        operation: String,
        /// Attempts made.
        attempts: u32,
    },
    /// A member's synchronisation failed.
    #[error("synchronisation of {entity_id} failed: {message}")]
    SynchronizationFailed {
        /// Member that failed to synchronise.
        entity_id: String,
        /// Underlying cause.
        message: String,
    },
    /// The document store failed.
    #[error("document store failed for {entity_id}: {message}")]
    Store {
        /// Document id.
        entity_id: String,
        /// Underlying cause.
        message: String,
    },
}

impl Fault {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingPrecondition { .. } => "missing_precondition",
            Self::AlreadyRunning { .. } => "already_running",
            Self::DuplicateMember { .. } => "duplicate_member",
            Self::ResourceNotFound { .. } => "resource_not_found",
            Self::ResourceAlreadyExists { .. } => "resource_already_exists",
            Self::RemoteOperationFailed { .. } => "remote_operation_failed",
            Self::Timeout { .. } => "timeout",
            Self::SynchronizationFailed { .. } => "synchronization_failed",
            Self::Store { .. } => "store_failed",
        }
    }

    /// Id of the entity the fault concerns.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::MissingPrecondition { entity_id, .. }
            | Self::AlreadyRunning { entity_id }
            | Self::DuplicateMember { entity_id, .. }
            | Self::ResourceNotFound { entity_id, .. }
            | Self::ResourceAlreadyExists { entity_id, .. }
            | Self::RemoteOperationFailed { entity_id, .. }
            | Self::Timeout { entity_id, .. }
            | Self::SynchronizationFailed { entity_id, .. }
            | Self::Store { entity_id, .. } => entity_id,
        }
    }

    /// Converts a provider error raised while acting on `entity_id`.
    #[must_use]
    pub fn remote(entity_id: impl Into<String>, error: ComputeError) -> Self {
        let entity_id = entity_id.into();
        match error {
            ComputeError::NotFound { resource, .. } => Self::ResourceNotFound {
                entity_id,
                resource,
            },
            ComputeError::AlreadyExists { resource, .. } => Self::ResourceAlreadyExists {
                entity_id,
                resource,
            },
            ComputeError::Remote { operation, message } => Self::RemoteOperationFailed {
                entity_id,
                operation,
                message,
            },
        }
    }

    /// Wraps a store error raised while handling document `entity_id`.
    #[must_use]
    pub fn store(entity_id: impl Into<String>, error: &StoreError) -> Self {
        Self::Store {
            entity_id: entity_id.into(),
            message: error.to_string(),
        }
    }

    /// Converts any fault into [`Fault::SynchronizationFailed`], keeping
    /// [`Fault::ResourceNotFound`] so callers can tell a vanished entity
    /// from a broken call.
    #[must_use]
    pub fn into_sync_failure(self) -> Self {
        match self {
            Self::ResourceNotFound { .. } | Self::SynchronizationFailed { .. } => self,
            other => Self::SynchronizationFailed {
                entity_id: other.entity_id().to_owned(),
                message: other.to_string(),
            },
        }
    }

    /// Tags the fault with the build phase it was raised in.
    #[must_use]
    pub const fn in_phase(self, phase: Phase) -> PhaseFault {
        PhaseFault { phase, fault: self }
    }
}

/// Build phase a fault was raised in; drives rollback scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Creating real security groups.
    SecurityGroupCreate,
    /// Replicating rules to real security groups.
    RuleCreate,
    /// Synchronising security groups during build.
    SecurityGroupSync,
    /// Launching instances.
    HostCreate,
    /// Attaching the execution profile.
    ProfileAttach,
    /// Synchronising hosts during build.
    HostSync,
    /// Anything that could not be classified.
    Unclassified,
}

impl Phase {
    /// Returns `true` for phases after which instances may exist.
    #[must_use]
    pub const fn touches_hosts(self) -> bool {
        matches!(
            self,
            Self::HostCreate | Self::ProfileAttach | Self::HostSync | Self::Unclassified
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::SecurityGroupCreate => "security_group_create",
            Self::RuleCreate => "rule_create",
            Self::SecurityGroupSync => "security_group_sync",
            Self::HostCreate => "host_create",
            Self::ProfileAttach => "profile_attach",
            Self::HostSync => "host_sync",
            Self::Unclassified => "unclassified",
        })
    }
}

/// Fault tagged with the phase that raised it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{phase}: {fault}")]
pub struct PhaseFault {
    /// Phase that raised the fault.
    pub phase: Phase,
    /// Underlying fault.
    #[source]
    pub fault: Fault,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(
        ComputeError::NotFound { resource: String::from("instance"), id: String::from("i-1") },
        "resource_not_found"
    )]
    #[case(
        ComputeError::AlreadyExists { resource: String::from("security_group"), id: String::from("web") },
        "resource_already_exists"
    )]
    #[case(
        ComputeError::Remote { operation: String::from("RunInstances"), message: String::from("boom") },
        "remote_operation_failed"
    )]
    fn remote_errors_map_to_stable_codes(#[case] error: ComputeError, #[case] code: &str) {
        let fault = Fault::remote("host-1", error);
        assert_eq!(fault.code(), code);
        assert_eq!(fault.entity_id(), "host-1");
    }

    #[rstest]
    fn sync_failure_keeps_not_found() {
        let vanished = Fault::ResourceNotFound {
            entity_id: String::from("host-1"),
            resource: String::from("instance"),
        };
        assert_eq!(vanished.clone().into_sync_failure(), vanished);

        let broken = Fault::RemoteOperationFailed {
            entity_id: String::from("host-1"),
            operation: String::from("DescribeInstances"),
            message: String::from("throttled"),
        }
        .into_sync_failure();
        assert_eq!(broken.code(), "synchronization_failed");
        assert_eq!(broken.entity_id(), "host-1");
    }

    #[rstest]
    #[case(Phase::SecurityGroupCreate, false)]
    #[case(Phase::RuleCreate, false)]
    #[case(Phase::SecurityGroupSync, false)]
    #[case(Phase::HostCreate, true)]
    #[case(Phase::ProfileAttach, true)]
    #[case(Phase::HostSync, true)]
    #[case(Phase::Unclassified, true)]
    fn host_phases_are_classified(#[case] phase: Phase, #[case] touches_hosts: bool) {
        assert_eq!(phase.touches_hosts(), touches_hosts);
    }
}
