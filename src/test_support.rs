//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedCompute`] is a deterministic in-memory cloud: it simulates
//! security groups, instances, and remote commands per region, records every
//! call, and fails any call matching an injected [`InjectedFailure`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::compute::{
    CommandId, CommandStatus, ComputeError, ComputeFuture, InstanceDescription, IpPermission,
    LaunchSpec, OutputEvent, OutputStream, Region, RemoteCompute, SecurityGroupDescription,
    TAG_ID, Tag,
};
use crate::config::DEFAULT_IMAGE_NAME;
use crate::model::InstanceState;

/// Image id [`ScriptedCompute`] resolves the default image name to.
pub const SCRIPTED_IMAGE_ID: &str = "ami-netfleet";

/// Records a single call made through [`ScriptedCompute`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeCall {
    /// Trait method name (for example `authorize_ingress`).
    pub operation: &'static str,
    /// Region the call targeted, if any.
    pub region: Option<Region>,
    /// Primary argument: group name or id, host `Id` tag, instance id,
    /// key name, or profile name depending on the operation.
    pub target: String,
}

/// Failure returned by every call matching its filters.
#[derive(Clone, Debug)]
pub struct InjectedFailure {
    operation: &'static str,
    region: Option<Region>,
    target: Option<String>,
    error: ComputeError,
}

impl InjectedFailure {
    /// Fails every call to `operation` with a generic remote error.
    #[must_use]
    pub fn on(operation: &'static str) -> Self {
        Self {
            operation,
            region: None,
            target: None,
            error: ComputeError::Remote {
                operation: operation.to_owned(),
                message: String::from("injected failure"),
            },
        }
    }

    /// Restricts the failure to one region.
    #[must_use]
    pub fn in_region(mut self, region: impl Into<Region>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Restricts the failure to one call target.
    #[must_use]
    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Replaces the returned error.
    #[must_use]
    pub fn with_error(mut self, error: ComputeError) -> Self {
        self.error = error;
        self
    }

    fn matches(&self, call: &ComputeCall) -> bool {
        self.operation == call.operation
            && self
                .region
                .as_ref()
                .is_none_or(|region| call.region.as_ref() == Some(region))
            && self
                .target
                .as_ref()
                .is_none_or(|target| *target == call.target)
    }
}

#[derive(Clone, Debug)]
struct GroupRecord {
    group_id: String,
    tags: BTreeMap<String, String>,
    ingress: Vec<IpPermission>,
    egress: Vec<IpPermission>,
}

#[derive(Clone, Debug)]
struct InstanceRecord {
    region: Region,
    description: InstanceDescription,
    profile: Option<String>,
}

#[derive(Clone, Debug)]
struct CommandRecord {
    statuses: VecDeque<CommandStatus>,
}

#[derive(Debug, Default)]
struct CloudState {
    regions: Vec<Region>,
    images: BTreeMap<String, String>,
    groups: BTreeMap<(Region, String), GroupRecord>,
    instances: BTreeMap<String, InstanceRecord>,
    commands: BTreeMap<String, CommandRecord>,
    command_script: Vec<CommandStatus>,
    command_output: BTreeMap<OutputStream, Vec<OutputEvent>>,
    sent_scripts: Vec<Vec<String>>,
    key_pairs: BTreeSet<(Region, String)>,
    profiles: BTreeSet<String>,
    failures: Vec<InjectedFailure>,
    calls: Vec<ComputeCall>,
    next_id: u32,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn record(
        &mut self,
        operation: &'static str,
        region: Option<&Region>,
        target: &str,
    ) -> Result<(), ComputeError> {
        let call = ComputeCall {
            operation,
            region: region.cloned(),
            target: target.to_owned(),
        };
        let failure = self
            .failures
            .iter()
            .find(|failure| failure.matches(&call))
            .map(|failure| failure.error.clone());
        self.calls.push(call);
        failure.map_or(Ok(()), Err)
    }

    fn group_by_id_mut(&mut self, region: &Region, group_id: &str) -> Option<&mut GroupRecord> {
        self.groups
            .iter_mut()
            .find(|((group_region, _), record)| group_region == region && record.group_id == group_id)
            .map(|(_, record)| record)
    }

    fn instance_mut(
        &mut self,
        region: &Region,
        instance_id: &str,
    ) -> Result<&mut InstanceRecord, ComputeError> {
        self.instances
            .get_mut(instance_id)
            .filter(|record| record.region == *region)
            .ok_or_else(|| not_found("instance", instance_id))
    }
}

fn not_found(resource: &str, id: &str) -> ComputeError {
    ComputeError::NotFound {
        resource: resource.to_owned(),
        id: id.to_owned(),
    }
}

fn already_exists(resource: &str, id: &str) -> ComputeError {
    ComputeError::AlreadyExists {
        resource: resource.to_owned(),
        id: id.to_owned(),
    }
}

fn tag_map(tags: &[Tag]) -> BTreeMap<String, String> {
    tags.iter()
        .map(|tag| (tag.key.clone(), tag.value.clone()))
        .collect()
}

/// Scripted in-memory compute provider. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCompute {
    state: Arc<Mutex<CloudState>>,
}

impl ScriptedCompute {
    /// Creates a cloud with the given regions, the default image
    /// registered, and commands that succeed on the second poll.
    #[must_use]
    pub fn with_regions(regions: &[&str]) -> Self {
        let compute = Self::default();
        {
            let mut state = compute.lock();
            state.regions = regions.iter().map(|name| Region::from(*name)).collect();
            state
                .images
                .insert(DEFAULT_IMAGE_NAME.to_owned(), SCRIPTED_IMAGE_ID.to_owned());
            state.command_script = vec![CommandStatus::InProgress, CommandStatus::Success];
        }
        compute
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a failure.
    pub fn inject(&self, failure: InjectedFailure) {
        self.lock().failures.push(failure);
    }

    /// Removes every registered failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Unregisters an image name.
    pub fn remove_image(&self, name: &str) {
        self.lock().images.remove(name);
    }

    /// Sets the statuses successive polls of new commands return; the last
    /// one repeats.
    pub fn script_command_statuses(&self, statuses: &[CommandStatus]) {
        self.lock().command_script = statuses.to_vec();
    }

    /// Sets the output returned for one stream of every command.
    pub fn script_command_output(&self, stream: OutputStream, events: &[(i64, &str)]) {
        self.lock().command_output.insert(
            stream,
            events
                .iter()
                .map(|(timestamp_ms, message)| OutputEvent {
                    timestamp_ms: *timestamp_ms,
                    message: (*message).to_owned(),
                })
                .collect(),
        );
    }

    /// Creates a security group directly, bypassing failure injection.
    pub fn seed_security_group(&self, region: &str, name: &str) -> String {
        let mut state = self.lock();
        let group_id = state.next_id("sg");
        state.groups.insert(
            (Region::from(region), name.to_owned()),
            GroupRecord {
                group_id: group_id.clone(),
                tags: BTreeMap::new(),
                ingress: Vec::new(),
                egress: Vec::new(),
            },
        );
        group_id
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.lock().calls.clone()
    }

    /// Calls to one operation.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> Vec<ComputeCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Real group id of `name` in `region`.
    #[must_use]
    pub fn group_id(&self, region: &str, name: &str) -> Option<String> {
        self.lock()
            .groups
            .get(&(Region::from(region), name.to_owned()))
            .map(|record| record.group_id.clone())
    }

    /// Tags of a real group.
    #[must_use]
    pub fn group_tags(&self, region: &str, name: &str) -> BTreeMap<String, String> {
        self.lock()
            .groups
            .get(&(Region::from(region), name.to_owned()))
            .map(|record| record.tags.clone())
            .unwrap_or_default()
    }

    /// Inbound permissions of a real group.
    #[must_use]
    pub fn group_ingress(&self, region: &str, name: &str) -> Vec<IpPermission> {
        self.lock()
            .groups
            .get(&(Region::from(region), name.to_owned()))
            .map(|record| record.ingress.clone())
            .unwrap_or_default()
    }

    /// Outbound permissions of a real group.
    #[must_use]
    pub fn group_egress(&self, region: &str, name: &str) -> Vec<IpPermission> {
        self.lock()
            .groups
            .get(&(Region::from(region), name.to_owned()))
            .map(|record| record.egress.clone())
            .unwrap_or_default()
    }

    /// Number of real groups across every region.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.lock().groups.len()
    }

    /// Live description of an instance.
    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<InstanceDescription> {
        self.lock()
            .instances
            .get(instance_id)
            .map(|record| record.description.clone())
    }

    /// Every known instance.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceDescription> {
        self.lock()
            .instances
            .values()
            .map(|record| record.description.clone())
            .collect()
    }

    /// Profile attached to an instance.
    #[must_use]
    pub fn instance_profile(&self, instance_id: &str) -> Option<String> {
        self.lock()
            .instances
            .get(instance_id)
            .and_then(|record| record.profile.clone())
    }

    /// Edits an instance's live description in place.
    pub fn mutate_instance(&self, instance_id: &str, edit: impl FnOnce(&mut InstanceDescription)) {
        if let Some(record) = self.lock().instances.get_mut(instance_id) {
            edit(&mut record.description);
        }
    }

    /// Makes an instance vanish from the provider.
    pub fn forget_instance(&self, instance_id: &str) {
        self.lock().instances.remove(instance_id);
    }

    /// Scripts sent through `send_remote_command`, in order.
    #[must_use]
    pub fn sent_scripts(&self) -> Vec<Vec<String>> {
        self.lock().sent_scripts.clone()
    }

    /// Imported key pairs as `(region, key name)`.
    #[must_use]
    pub fn key_pairs(&self) -> Vec<(Region, String)> {
        self.lock().key_pairs.iter().cloned().collect()
    }

    /// Created instance profiles.
    #[must_use]
    pub fn instance_profiles(&self) -> Vec<String> {
        self.lock().profiles.iter().cloned().collect()
    }

    fn set_state(
        &self,
        operation: &'static str,
        region: &Region,
        instance_id: &str,
        next: InstanceState,
    ) -> Result<(), ComputeError> {
        let mut state = self.lock();
        state.record(operation, Some(region), instance_id)?;
        let record = state.instance_mut(region, instance_id)?;
        if record.description.state == Some(InstanceState::Terminated) {
            return Err(ComputeError::Remote {
                operation: operation.to_owned(),
                message: format!("instance {instance_id} is terminated"),
            });
        }
        record.description.state = Some(next);
        Ok(())
    }

    fn change_permission(
        &self,
        operation: &'static str,
        region: &Region,
        group_id: &str,
        permission: &IpPermission,
        egress: bool,
        add: bool,
    ) -> Result<(), ComputeError> {
        let mut state = self.lock();
        state.record(operation, Some(region), group_id)?;
        let record = state
            .group_by_id_mut(region, group_id)
            .ok_or_else(|| not_found("security_group", group_id))?;
        let permissions = if egress {
            &mut record.egress
        } else {
            &mut record.ingress
        };
        let position = permissions.iter().position(|existing| existing == permission);
        match (add, position) {
            (true, Some(_)) => Err(already_exists("permission", group_id)),
            (true, None) => {
                permissions.push(permission.clone());
                Ok(())
            }
            (false, Some(index)) => {
                permissions.remove(index);
                Ok(())
            }
            (false, None) => Err(not_found("permission", group_id)),
        }
    }
}

impl RemoteCompute for ScriptedCompute {
    fn describe_regions(&self) -> ComputeFuture<'_, Vec<Region>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("describe_regions", None, "")?;
            Ok(state.regions.clone())
        })
    }

    fn describe_image<'a>(
        &'a self,
        region: &'a Region,
        name_filter: &'a str,
    ) -> ComputeFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("describe_image", Some(region), name_filter)?;
            Ok(state.images.get(name_filter).cloned())
        })
    }

    fn describe_default_vpc<'a>(&'a self, region: &'a Region) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            self.lock()
                .record("describe_default_vpc", Some(region), region)?;
            Ok(format!("vpc-{region}"))
        })
    }

    fn describe_security_group<'a>(
        &'a self,
        region: &'a Region,
        name: &'a str,
    ) -> ComputeFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("describe_security_group", Some(region), name)?;
            Ok(state
                .groups
                .get(&(region.clone(), name.to_owned()))
                .map(|record| record.group_id.clone()))
        })
    }

    fn describe_tagged_security_groups<'a>(
        &'a self,
        region: &'a Region,
        tag: &'a Tag,
    ) -> ComputeFuture<'a, Vec<SecurityGroupDescription>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("describe_tagged_security_groups", Some(region), &tag.value)?;
            Ok(state
                .groups
                .iter()
                .filter(|((group_region, _), record)| {
                    group_region == region && record.tags.get(&tag.key) == Some(&tag.value)
                })
                .map(|((_, name), record)| SecurityGroupDescription {
                    group_id: record.group_id.clone(),
                    name: name.clone(),
                })
                .collect())
        })
    }

    fn create_security_group<'a>(
        &'a self,
        region: &'a Region,
        name: &'a str,
        _description: &'a str,
        _vpc_id: &'a str,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("create_security_group", Some(region), name)?;
            let key = (region.clone(), name.to_owned());
            if state.groups.contains_key(&key) {
                return Err(already_exists("security_group", name));
            }
            let group_id = state.next_id("sg");
            state.groups.insert(
                key,
                GroupRecord {
                    group_id: group_id.clone(),
                    tags: BTreeMap::new(),
                    ingress: Vec::new(),
                    egress: Vec::new(),
                },
            );
            Ok(group_id)
        })
    }

    fn delete_security_group<'a>(
        &'a self,
        region: &'a Region,
        name: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("delete_security_group", Some(region), name)?;
            let key = (region.clone(), name.to_owned());
            let group_id = state
                .groups
                .get(&key)
                .map(|record| record.group_id.clone())
                .ok_or_else(|| not_found("security_group", name))?;
            let in_use = state.instances.values().any(|record| {
                record.region == *region
                    && record.description.state != Some(InstanceState::Terminated)
                    && record.description.security_group_ids.contains(&group_id)
            });
            if in_use {
                return Err(ComputeError::Remote {
                    operation: String::from("delete_security_group"),
                    message: format!("{name} is still referenced by an instance"),
                });
            }
            state.groups.remove(&key);
            Ok(())
        })
    }

    fn authorize_ingress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.change_permission("authorize_ingress", region, group_id, permission, false, true)
        })
    }

    fn authorize_egress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.change_permission("authorize_egress", region, group_id, permission, true, true)
        })
    }

    fn revoke_ingress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.change_permission("revoke_ingress", region, group_id, permission, false, false)
        })
    }

    fn revoke_egress<'a>(
        &'a self,
        region: &'a Region,
        group_id: &'a str,
        permission: &'a IpPermission,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.change_permission("revoke_egress", region, group_id, permission, true, false)
        })
    }

    fn create_tags<'a>(
        &'a self,
        region: &'a Region,
        resource_id: &'a str,
        tags: &'a [Tag],
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("create_tags", Some(region), resource_id)?;
            if let Some(record) = state.group_by_id_mut(region, resource_id) {
                record.tags.extend(tag_map(tags));
                return Ok(());
            }
            let record = state.instance_mut(region, resource_id)?;
            record.description.tags.extend(tag_map(tags));
            Ok(())
        })
    }

    fn run_instance<'a>(
        &'a self,
        region: &'a Region,
        spec: &'a LaunchSpec,
    ) -> ComputeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.lock();
            let host_id = spec
                .tags
                .iter()
                .find(|tag| tag.key == TAG_ID)
                .map(|tag| tag.value.clone())
                .unwrap_or_default();
            state.record("run_instance", Some(region), &host_id)?;
            let instance_id = state.next_id("i");
            let octet = state.next_id % 250;
            let description = InstanceDescription {
                instance_id: instance_id.clone(),
                state: Some(InstanceState::Pending),
                tags: tag_map(&spec.tags),
                public_ip: Some(format!("203.0.113.{octet}")),
                public_dns: Some(format!("ec2-203-0-113-{octet}.{region}.compute.example")),
                image_id: Some(spec.image_id.clone()),
                size: Some(spec.size.as_str().to_owned()),
                availability_zone: Some(
                    spec.availability_zone
                        .clone()
                        .unwrap_or_else(|| format!("{region}a")),
                ),
                security_group_ids: spec.security_group_ids.clone(),
            };
            state.instances.insert(
                instance_id.clone(),
                InstanceRecord {
                    region: region.clone(),
                    description,
                    profile: None,
                },
            );
            Ok(instance_id)
        })
    }

    fn describe_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, Option<InstanceDescription>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("describe_instance", Some(region), instance_id)?;
            Ok(state
                .instances
                .get(instance_id)
                .filter(|record| record.region == *region)
                .map(|record| record.description.clone()))
        })
    }

    fn describe_tagged_instances<'a>(
        &'a self,
        region: &'a Region,
        tag: &'a Tag,
    ) -> ComputeFuture<'a, Vec<InstanceDescription>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("describe_tagged_instances", Some(region), &tag.value)?;
            Ok(state
                .instances
                .values()
                .filter(|record| {
                    record.region == *region
                        && record.description.tag(&tag.key) == Some(tag.value.as_str())
                })
                .map(|record| record.description.clone())
                .collect())
        })
    }

    fn start_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.set_state("start_instance", region, instance_id, InstanceState::Pending)
        })
    }

    fn stop_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            self.set_state("stop_instance", region, instance_id, InstanceState::Stopping)
        })
    }

    fn terminate_instance<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("terminate_instance", Some(region), instance_id)?;
            let record = state.instance_mut(region, instance_id)?;
            if record.description.state != Some(InstanceState::Terminated) {
                record.description.state = Some(InstanceState::ShuttingDown);
            }
            Ok(())
        })
    }

    fn wait_for_instance_state<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
        target: InstanceState,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut state = self.lock();
            state.record("wait_for_instance_state", Some(region), instance_id)?;
            let record = state.instance_mut(region, instance_id)?;
            record.description.state = Some(target);
            Ok(())
        })
    }

    fn attach_instance_profile<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
        profile_name: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("attach_instance_profile", Some(region), instance_id)?;
            let record = state.instance_mut(region, instance_id)?;
            if record.description.state != Some(InstanceState::Running) {
                return Err(ComputeError::Remote {
                    operation: String::from("attach_instance_profile"),
                    message: format!("instance {instance_id} is not running"),
                });
            }
            record.profile = Some(profile_name.to_owned());
            Ok(())
        })
    }

    fn send_remote_command<'a>(
        &'a self,
        region: &'a Region,
        instance_id: &'a str,
        script_lines: &'a [String],
        _output_channel: &'a str,
    ) -> ComputeFuture<'a, CommandId> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("send_remote_command", Some(region), instance_id)?;
            state.instance_mut(region, instance_id)?;
            let command_id = state.next_id("cmd");
            let statuses = state.command_script.iter().copied().collect();
            state
                .commands
                .insert(command_id.clone(), CommandRecord { statuses });
            state.sent_scripts.push(script_lines.to_vec());
            Ok(CommandId::from(command_id))
        })
    }

    fn poll_command_status<'a>(
        &'a self,
        region: &'a Region,
        command_id: &'a CommandId,
        instance_id: &'a str,
    ) -> ComputeFuture<'a, CommandStatus> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("poll_command_status", Some(region), instance_id)?;
            let record = state
                .commands
                .get_mut(command_id.as_str())
                .ok_or_else(|| not_found("command", command_id))?;
            let status = if record.statuses.len() > 1 {
                record.statuses.pop_front()
            } else {
                record.statuses.front().copied()
            };
            Ok(status.unwrap_or(CommandStatus::Success))
        })
    }

    fn fetch_command_output<'a>(
        &'a self,
        region: &'a Region,
        command_id: &'a CommandId,
        instance_id: &'a str,
        stream: OutputStream,
    ) -> ComputeFuture<'a, Vec<OutputEvent>> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("fetch_command_output", Some(region), instance_id)?;
            if !state.commands.contains_key(command_id.as_str()) {
                return Err(not_found("command", command_id));
            }
            Ok(state.command_output.get(&stream).cloned().unwrap_or_default())
        })
    }

    fn import_key_pair<'a>(
        &'a self,
        region: &'a Region,
        key_name: &'a str,
        _public_key: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("import_key_pair", Some(region), key_name)?;
            if state.key_pairs.insert((region.clone(), key_name.to_owned())) {
                Ok(())
            } else {
                Err(already_exists("key_pair", key_name))
            }
        })
    }

    fn create_instance_profile<'a>(
        &'a self,
        profile_name: &'a str,
        _policy_arn: &'a str,
    ) -> ComputeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.lock();
            state.record("create_instance_profile", None, profile_name)?;
            if state.profiles.insert(profile_name.to_owned()) {
                Ok(())
            } else {
                Err(already_exists("instance_profile", profile_name))
            }
        })
    }
}

static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Prefix shared by every variable the crate reads.
const ENV_PREFIX: &str = "NETFLEET_";

/// Holds the process environment for one test.
///
/// Every `NETFLEET_*` variable is cleared on entry so the developer's shell
/// cannot leak into configuration or log filters, then the overrides are
/// applied. Dropping the guard puts back exactly what was there before.
pub struct EnvGuard {
    saved: Vec<(OsString, Option<OsString>)>,
    _lock: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Clears the crate's variables and applies `overrides` while holding
    /// a process-wide lock.
    pub async fn isolated(overrides: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                overrides.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate keys passed to EnvGuard::isolated"
        );

        let lock = ENV_LOCK.lock().await;
        let mut keys: BTreeSet<OsString> = env::vars_os()
            .map(|(key, _)| key)
            .filter(|key| key.to_str().is_some_and(|key| key.starts_with(ENV_PREFIX)))
            .collect();
        keys.extend(overrides.iter().map(|(key, _)| OsString::from(key)));
        let saved = keys
            .into_iter()
            .map(|key| {
                let old = env::var_os(&key);
                (key, old)
            })
            .collect::<Vec<_>>();

        // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
        unsafe {
            for (key, _) in &saved {
                env::remove_var(key);
            }
            for (key, value) in overrides {
                env::set_var(key, value);
            }
        }

        Self { saved, _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: `_lock` is still held while the environment is restored.
        unsafe {
            for (key, old) in &self.saved {
                match old {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
