//! Pulling live instance state back into a host record.

use std::str::FromStr;

use tracing::{debug, warn};

use crate::compute::{
    InstanceDescription, Region, RemoteCompute, TAG_ID, TAG_NAME, TAG_NETWORK_ID, Tag,
};
use crate::fault::Fault;
use crate::model::{Host, InstanceSize, InstanceState, SecurityGroup, reconcile};

use super::{HostController, require_region};

/// Fields a synchronisation kept from the previous record because the
/// provider omitted them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    /// Names of the defaulted fields, in merge order.
    pub defaulted: Vec<&'static str>,
}

impl SyncReport {
    /// Returns `true` when every field came from live data.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.defaulted.is_empty()
    }

    fn merge<T>(&mut self, host_id: &str, field: &'static str, slot: &mut T, live: Option<T>)
    where
        T: Clone,
    {
        let merged = reconcile(slot.clone(), live);
        *slot = merged.value;
        if merged.defaulted {
            warn!(host_id = %host_id, field, "field missing from live instance; keeping previous value");
            self.defaulted.push(field);
        }
    }
}

impl<C: RemoteCompute + ?Sized> HostController<'_, C> {
    /// Finds the host's live instance by id, or by its `Id` tag when the
    /// id was never recorded. Prefers instances that are not terminated.
    pub(super) async fn locate(
        &self,
        host: &Host,
        region: &Region,
    ) -> Result<Option<InstanceDescription>, Fault> {
        if let Some(instance_id) = &host.instance_id {
            return self
                .compute
                .describe_instance(region, instance_id)
                .await
                .map_err(|err| Fault::remote(&host.id, err));
        }
        if host.id.is_empty() {
            return Ok(None);
        }
        let tagged = self
            .compute
            .describe_tagged_instances(region, &Tag::new(TAG_ID, &host.id))
            .await
            .map_err(|err| Fault::remote(&host.id, err))?;
        let alive = tagged
            .iter()
            .find(|instance| instance.state != Some(InstanceState::Terminated))
            .cloned();
        Ok(alive.or_else(|| tagged.into_iter().next()))
    }

    /// Overwrites every locally derived field from the live instance.
    ///
    /// Fields the provider omits keep their previous value and are listed
    /// in the returned report. The security group reference is resolved by
    /// matching the instance's attached groups against `groups`.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ResourceNotFound`] when no live instance exists and
    /// a remote fault when the lookup fails.
    pub async fn transform_from_aws(
        &self,
        host: &mut Host,
        groups: &[SecurityGroup],
    ) -> Result<SyncReport, Fault> {
        let region = require_region(host)?;
        let live = self
            .locate(host, &region)
            .await?
            .ok_or_else(|| Fault::ResourceNotFound {
                entity_id: host.id.clone(),
                resource: String::from("instance"),
            })?;

        let host_id = host.id.clone();
        let mut report = SyncReport::default();
        host.instance_id = Some(live.instance_id.clone());
        report.merge(
            &host_id,
            "network_id",
            &mut host.network_id,
            live.tag(TAG_NETWORK_ID).map(|value| Some(value.to_owned())),
        );
        report.merge(
            &host_id,
            "name",
            &mut host.name,
            live.tag(TAG_NAME).map(str::to_owned),
        );
        report.merge(&host_id, "state", &mut host.state, live.state.map(Some));
        let size = live.size.as_deref().and_then(|raw| {
            InstanceSize::from_str(raw)
                .inspect_err(|err| warn!(host_id = %host_id, error = %err, "unrecognised instance type"))
                .ok()
        });
        report.merge(&host_id, "size", &mut host.size, size);
        report.merge(
            &host_id,
            "availability_zone",
            &mut host.availability_zone,
            live.availability_zone.clone().map(Some),
        );
        report.merge(
            &host_id,
            "image_id",
            &mut host.image_id,
            live.image_id.clone().map(Some),
        );
        report.merge(&host_id, "ipv4", &mut host.ipv4, live.public_ip.clone().map(Some));
        report.merge(
            &host_id,
            "public_dns",
            &mut host.public_dns,
            live.public_dns.clone().map(Some),
        );
        let group = live.security_group_ids.iter().find_map(|group_id| {
            groups
                .iter()
                .find(|group| group.owns_real_group(group_id))
                .map(|group| Some(group.id.clone()))
        });
        report.merge(&host_id, "security_group_id", &mut host.security_group_id, group);

        debug!(
            host_id = %host_id,
            state = ?host.state,
            defaulted = report.defaulted.len(),
            "host synchronised"
        );
        Ok(report)
    }
}
