//! Capability interface for the remote compute provider.
//!
//! Every call names the region it targets explicitly, so one capability
//! value serves all regions without any process-wide "current region".
//! Implementations translate provider-specific failures into
//! [`ComputeError`]; the orchestration layer decides which of those are
//! tolerated.

mod types;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::{InstanceSize, InstanceState, Rule};

pub use types::{CommandId, Region};

/// Tag key carrying the display name of a resource.
pub const TAG_NAME: &str = "Name";
/// Tag key carrying the locally assigned logical id.
pub const TAG_ID: &str = "Id";
/// Tag key carrying the owning network id.
pub const TAG_NETWORK_ID: &str = "NetworkId";
/// Tag key carrying the logical security group id of an instance.
pub const TAG_SECURITY_GROUP_ID: &str = "SecurityGroupId";

/// Errors reported by a [`RemoteCompute`] implementation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// Raised when the addressed resource does not exist.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of resource (for example `security_group`).
        resource: String,
        /// Provider or logical identifier used for the lookup.
        id: String,
    },
    /// Raised when a create call collides with an existing resource.
    #[error("{resource} {id} already exists")]
    AlreadyExists {
        /// Kind of resource.
        resource: String,
        /// Identifier that collided.
        id: String,
    },
    /// Wrapper for any other provider failure.
    #[error("{operation} failed: {message}")]
    Remote {
        /// Provider operation that failed.
        operation: String,
        /// Message returned by the provider.
        message: String,
    },
}

impl ComputeError {
    /// Returns `true` for [`ComputeError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for [`ComputeError::AlreadyExists`].
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Key/value tag attached to a provider resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One firewall permission as understood by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IpPermission {
    /// Transport protocol (always `tcp` for logical rules).
    pub protocol: String,
    /// Source or destination CIDR.
    pub cidr: String,
    /// First port of the inclusive range.
    pub from_port: u16,
    /// Last port of the inclusive range.
    pub to_port: u16,
}

impl From<&Rule> for IpPermission {
    fn from(rule: &Rule) -> Self {
        Self {
            protocol: String::from("tcp"),
            cidr: rule.source.clone(),
            from_port: rule.port_range_start,
            to_port: rule.port_range_end,
        }
    }
}

/// Parameters for launching a single instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Boot image identifier.
    pub image_id: String,
    /// Instance type.
    pub size: InstanceSize,
    /// Key pair name installed on the instance.
    pub key_name: String,
    /// Real security group identifiers attached at launch.
    pub security_group_ids: Vec<String>,
    /// Tags applied to the instance.
    pub tags: Vec<Tag>,
    /// Bootstrap script; transport encoding is left to the implementation.
    pub user_data: String,
    /// Optional placement constraint.
    pub availability_zone: Option<String>,
}

/// Live view of an instance as reported by the provider.
///
/// Every field except the identifier is optional because providers omit
/// data for instances in transitional states.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceDescription {
    /// Provider instance identifier.
    pub instance_id: String,
    /// Lifecycle state.
    pub state: Option<InstanceState>,
    /// Tags attached to the instance.
    pub tags: BTreeMap<String, String>,
    /// Public IPv4 address.
    pub public_ip: Option<String>,
    /// Public DNS name.
    pub public_dns: Option<String>,
    /// Boot image identifier.
    pub image_id: Option<String>,
    /// Instance type as reported by the provider.
    pub size: Option<String>,
    /// Placement availability zone.
    pub availability_zone: Option<String>,
    /// Real security group identifiers attached to the instance.
    pub security_group_ids: Vec<String>,
}

impl InstanceDescription {
    /// Looks up a tag value by key.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Live view of a real security group.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SecurityGroupDescription {
    /// Provider group identifier.
    pub group_id: String,
    /// Group name.
    pub name: String,
}

/// Status of a remote command invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandStatus {
    /// Accepted but not yet delivered.
    Pending,
    /// Executing on the instance.
    InProgress,
    /// Delivery postponed by the provider.
    Delayed,
    /// Completed successfully.
    Success,
    /// Cancelled before completion.
    Cancelled,
    /// Exceeded the provider-side execution timeout.
    TimedOut,
    /// Completed with a failure.
    Failed,
}

impl CommandStatus {
    /// Returns `true` while the command has not reached a final status.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Delayed)
    }
}

/// Output stream of a remote command.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One line of command output as stored by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Output line.
    pub message: String,
}

/// Future returned by compute operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Operations consumed from the compute provider.
pub trait RemoteCompute: Send + Sync {
    /// Lists the regions available to the account.
    fn describe_regions(&self) -> ComputeFuture<'_, Vec<Region>>;

    /// Resolves the first image whose name matches `name_filter`.
    fn describe_image<'a>(
        &'a self,
        region: &'a Region,
        name_filter: &'a str,
    ) -> ComputeFuture<'a, Option<String>>;

    /// Resolves the default virtual network of a region.
    fn describe_default_vpc<'a>(&'a self, region: &'a Region) -> ComputeFuture<'a, String>;

    /// Looks up a real security group by name.
    fn describe_security_group<'a>(
        &'a self,
        region: &'a Region,
        name: &'a str,
    ) -> ComputeFuture<'a, Option<String>>;

    /// Lists security groups carrying `tag`.
    fn describe_tagged_security_groups<'a>(
        &'a self,
        region: &'a Region,
        tag: &'a Tag,
    ) -> ComputeFuture<'a, Vec<SecurityGroupDescription>>;

    /// Creates a security group and returns its provider identifier.
    fn create_security_group<'a>(
        &'a self,
        region: &'a Region,
        name: &'a str,
        description: &'a str,
        vpc_id: &'a str,
    ) -> ComputeFuture<'a, String>;

    /// Deletes a security group by name.
    fn delete_security_group<'a>(
        &'a self,
        region: &'a Region,
        name: &'a str,
    ) -> ComputeFuture<'a, ()>;

    /// Adds an inbound permission to a group.
    fn authorize_ingress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()>;

    /// Adds an outbound permission to a group.
    fn authorize_egress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()>;

    /// Removes an inbound permission from a group.
    fn revoke_ingress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()>;

    /// Removes an outbound permission from a group.
    fn revoke_egress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()>;

    /// Attaches tags to any taggable resource.
    fn create_tags<'a>(
        &'a self,
        region: &'a Region,
        resource_id: &'a str,
        tags: &'a [Tag],
    ) -> ComputeFuture<'a, ()>;

    /// Launches one instance and returns its provider identifier.
    fn run_instance<'a>(
        &'a self,
        region: &'a Region,
        spec: &'a LaunchSpec,
    ) -> ComputeFuture<'a, String>;

    /// Describes one instance; `None` when the provider no longer knows it.
    fn describe_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, Option<InstanceDescription>>;

    /// Lists instances carrying `tag`.
    fn describe_tagged_instances<'a>(
        &'a self,
        region: &'a Region,
        tag: &'a Tag,
    ) -> ComputeFuture<'a, Vec<InstanceDescription>>;

    /// Starts a stopped instance.
    fn start_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, ()>;

    /// Stops a running instance.
    fn stop_instance<'a>(&'a self, region: &'a Region, instance_id: &'a str)
    -> ComputeFuture<'a, ()>;

    /// Terminates an instance.
    fn terminate_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, ()>;

    /// Blocks until the instance reports `target`.
    fn wait_for_instance_state<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
        target: InstanceState,
    ) -> ComputeFuture<'a, ()>;

    /// Associates an execution profile with a running instance.
    fn attach_instance_profile<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
        profile_name: &'a str,
    ) -> ComputeFuture<'a, ()>;

    /// Dispatches a shell script to an instance.
    fn send_remote_command<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
        script_lines: &'a [String],
        output_channel: &'a str,
    ) -> ComputeFuture<'a, CommandId>;

    /// Reports the status of a dispatched command.
    fn poll_command_status<'a>(
        &'a self,
        region: &'a Region,
        command_id: &'a CommandId,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, CommandStatus>;

    /// Fetches one output stream of a command, ordered as stored.
    fn fetch_command_output<'a>(
        &'a self,
        region: &'a Region,
        command_id: &'a CommandId,
        instance_id: &'a str,
        stream: OutputStream,
    ) -> ComputeFuture<'a, Vec<OutputEvent>>;

    /// Imports a public key under `key_name`.
    fn import_key_pair<'a>(
        &'a self,
        region: &'a Region,
        key_name: &'a str,
        public_key: &'a str,
    ) -> ComputeFuture<'a, ()>;

    /// Creates an execution profile bound to `policy_arn`.
    fn create_instance_profile<'a>(
        &'a self,
        profile_name: &'a str,
        policy_arn: &'a str,
    ) -> ComputeFuture<'a, ()>;
}
