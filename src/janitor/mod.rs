//! Tag-driven janitor for orphaned network resources.
//!
//! Every real resource created for a network carries a `NetworkId` tag.
//! When a network document is lost or a teardown is interrupted, the
//! janitor finds those resources by tag in every region and deletes them,
//! failing if anything tagged remains afterwards.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compute::{ComputeError, Region, RemoteCompute, TAG_NETWORK_ID, Tag};
use crate::model::InstanceState;

/// Summary of janitor work.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Instances terminated during the sweep.
    pub terminated_instances: usize,
    /// Security groups deleted during the sweep.
    pub deleted_security_groups: usize,
}

/// Errors returned by the janitor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JanitorError {
    /// Raised when the network id to sweep is blank.
    #[error("missing {field}")]
    InvalidInput {
        /// Name of the missing field.
        field: String,
    },
    /// Raised when resources remain after the sweep.
    #[error("resources remain after janitor sweep: {message}")]
    NotClean {
        /// Human-readable description of what remains.
        message: String,
    },
    /// Raised when a provider call fails.
    #[error(transparent)]
    Remote(#[from] ComputeError),
}

/// Deletes every real resource tagged with a network id.
#[derive(Debug)]
pub struct Janitor<'a, C: ?Sized> {
    compute: &'a C,
}

#[derive(Default)]
struct Remaining {
    instances: usize,
    security_groups: usize,
}

impl<'a, C: RemoteCompute + ?Sized> Janitor<'a, C> {
    /// Borrows the compute capability.
    #[must_use]
    pub const fn new(compute: &'a C) -> Self {
        Self { compute }
    }

    /// Sweeps every region for resources tagged `NetworkId=<network_id>`.
    ///
    /// Within a region, instances are terminated and awaited before any
    /// security group is deleted, since a group cannot be deleted while an
    /// instance still references it. Already-missing resources count as
    /// deleted elsewhere and are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::Remote`] when a provider call fails and
    /// [`JanitorError::NotClean`] when tagged resources survive the sweep.
    pub async fn sweep(&self, network_id: &str) -> Result<SweepSummary, JanitorError> {
        let network_id = network_id.trim();
        if network_id.is_empty() {
            return Err(JanitorError::InvalidInput {
                field: String::from("network_id"),
            });
        }
        let tag = Tag::new(TAG_NETWORK_ID, network_id);
        let regions = self.compute.describe_regions().await?;

        let mut summary = SweepSummary::default();
        for region in &regions {
            summary.terminated_instances += self.terminate_instances(region, &tag).await?;
            summary.deleted_security_groups += self.delete_security_groups(region, &tag).await?;
        }

        let mut remaining = Remaining::default();
        for region in &regions {
            remaining.instances += self.live_instances(region, &tag).await?.len();
            remaining.security_groups += self
                .compute
                .describe_tagged_security_groups(region, &tag)
                .await?
                .len();
        }
        if remaining.instances > 0 || remaining.security_groups > 0 {
            let message = format!(
                "instances remaining: {}, security groups remaining: {}",
                remaining.instances, remaining.security_groups
            );
            warn!(network_id, %message, "janitor sweep left resources behind");
            return Err(JanitorError::NotClean { message });
        }

        info!(
            network_id,
            terminated_instances = summary.terminated_instances,
            deleted_security_groups = summary.deleted_security_groups,
            "janitor sweep finished"
        );
        Ok(summary)
    }

    async fn live_instances(
        &self,
        region: &Region,
        tag: &Tag,
    ) -> Result<Vec<String>, ComputeError> {
        let instances = self.compute.describe_tagged_instances(region, tag).await?;
        Ok(instances
            .into_iter()
            .filter(|instance| instance.state != Some(InstanceState::Terminated))
            .map(|instance| instance.instance_id)
            .collect())
    }

    async fn terminate_instances(&self, region: &Region, tag: &Tag) -> Result<usize, ComputeError> {
        let instance_ids = self.live_instances(region, tag).await?;
        let mut terminated = Vec::with_capacity(instance_ids.len());
        for instance_id in instance_ids {
            match self.compute.terminate_instance(region, &instance_id).await {
                Ok(()) => terminated.push(instance_id),
                Err(err) if err.is_not_found() => {
                    debug!(region = %region, instance_id = %instance_id, "instance already gone");
                }
                Err(err) => return Err(err),
            }
        }
        for instance_id in &terminated {
            self.compute
                .wait_for_instance_state(region, instance_id, InstanceState::Terminated)
                .await?;
            info!(region = %region, instance_id = %instance_id, "orphaned instance terminated");
        }
        Ok(terminated.len())
    }

    async fn delete_security_groups(
        &self,
        region: &Region,
        tag: &Tag,
    ) -> Result<usize, ComputeError> {
        let groups = self
            .compute
            .describe_tagged_security_groups(region, tag)
            .await?;
        let mut deleted = 0;
        for group in groups {
            match self.compute.delete_security_group(region, &group.name).await {
                Ok(()) => {
                    deleted += 1;
                    info!(region = %region, group_id = %group.group_id, "orphaned security group deleted");
                }
                Err(err) if err.is_not_found() => {
                    debug!(region = %region, group_id = %group.group_id, "security group already gone");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests;
