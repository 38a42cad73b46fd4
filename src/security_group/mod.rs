//! Replication of one logical security group across every region.
//!
//! [`SecurityGroupManager`] owns no state: it borrows the compute
//! capability and mutates the [`SecurityGroup`] record it is handed.
//! Every per-region or per-rule fan-out goes through [`settle`], so a
//! failing region never cancels its siblings.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::compute::{
    ComputeError, IpPermission, Region, RemoteCompute, TAG_ID, TAG_NAME, TAG_NETWORK_ID, Tag,
};
use crate::fault::{Fault, Phase, PhaseFault};
use crate::model::{Rule, RuleDirection, SecurityGroup};
use crate::settle::settle;

/// Real group created (or re-used) in one region. A tagging failure keeps
/// the group recorded but is still reported.
struct RegionalGroup {
    region: Region,
    group_id: String,
    tag_fault: Option<Fault>,
}

/// Converts a provider error for one region, naming the region in the
/// fault so callers can tell which one failed.
fn regional_fault(entity_id: &str, region: &Region, error: ComputeError) -> Fault {
    match Fault::remote(entity_id, error) {
        Fault::RemoteOperationFailed {
            entity_id: id,
            operation,
            message,
        } => Fault::RemoteOperationFailed {
            entity_id: id,
            operation: format!("{operation} in {region}"),
            message,
        },
        other => other,
    }
}

fn require(group: &SecurityGroup, phase: Phase) -> Result<(), PhaseFault> {
    if group.id.trim().is_empty() {
        return Err(Fault::MissingPrecondition {
            entity_id: group.name.clone(),
            field: "id",
        }
        .in_phase(phase));
    }
    if group.name.trim().is_empty() {
        return Err(Fault::MissingPrecondition {
            entity_id: group.id.clone(),
            field: "name",
        }
        .in_phase(phase));
    }
    Ok(())
}

/// Maintains one logical group as N real per-region groups.
#[derive(Debug)]
pub struct SecurityGroupManager<'a, C: ?Sized> {
    compute: &'a C,
}

impl<'a, C: RemoteCompute + ?Sized> SecurityGroupManager<'a, C> {
    /// Borrows the compute capability.
    #[must_use]
    pub const fn new(compute: &'a C) -> Self {
        Self { compute }
    }

    /// Creates the real group in every region, then replicates every rule.
    ///
    /// An existing group of the same name is re-used. Regions that succeed
    /// stay recorded even when another region fails.
    ///
    /// # Errors
    ///
    /// Returns a [`Phase::SecurityGroupCreate`] fault naming the first
    /// failed region, or a [`Phase::RuleCreate`] fault when rule
    /// replication fails. A failed region listing leaves no way to tell
    /// what already exists and is [`Phase::Unclassified`].
    pub async fn create(&self, group: &mut SecurityGroup) -> Result<(), PhaseFault> {
        require(group, Phase::SecurityGroupCreate)?;
        let regions = self
            .compute
            .describe_regions()
            .await
            .map_err(|err| Fault::remote(&group.id, err).in_phase(Phase::Unclassified))?;

        let mut tags = vec![Tag::new(TAG_NAME, &group.name), Tag::new(TAG_ID, &group.id)];
        if let Some(network_id) = &group.network_id {
            tags.push(Tag::new(TAG_NETWORK_ID, network_id));
        }

        let outcomes = settle(
            regions
                .iter()
                .map(|region| self.create_in_region(group, region, &tags)),
        )
        .await;

        let mut region_fault = None;
        for outcome in outcomes.into_outcomes() {
            let (region, fault) = match outcome {
                Ok(created) => {
                    group
                        .real_security_groups
                        .insert(created.region.clone(), created.group_id);
                    (created.region, created.tag_fault)
                }
                Err((region, fault)) => (region, Some(fault)),
            };
            if let Some(fault) = fault {
                warn!(
                    security_group_id = %group.id,
                    region = %region,
                    error = %fault,
                    "security group creation failed in region"
                );
                region_fault.get_or_insert(fault);
            }
        }

        if !group.real_security_groups.is_empty() && group.running_since.is_none() {
            group.running_since = Some(Utc::now());
        }
        if let Some(fault) = region_fault {
            return Err(fault.in_phase(Phase::SecurityGroupCreate));
        }

        self.replicate_rules(group).await?;
        info!(
            security_group_id = %group.id,
            regions = group.real_security_groups.len(),
            "security group created"
        );
        Ok(())
    }

    async fn create_in_region(
        &self,
        group: &SecurityGroup,
        region: &Region,
        tags: &[Tag],
    ) -> Result<RegionalGroup, (Region, Fault)> {
        let failed = |err| (region.clone(), regional_fault(&group.id, region, err));

        let vpc_id = self
            .compute
            .describe_default_vpc(region)
            .await
            .map_err(failed)?;

        let group_id = match self
            .compute
            .create_security_group(region, &group.name, &group.name, &vpc_id)
            .await
        {
            Ok(group_id) => group_id,
            Err(err) if err.is_already_exists() => self
                .compute
                .describe_security_group(region, &group.name)
                .await
                .map_err(failed)?
                .ok_or_else(|| {
                    (
                        region.clone(),
                        Fault::ResourceNotFound {
                            entity_id: group.id.clone(),
                            resource: format!("security_group in {region}"),
                        },
                    )
                })
                .inspect(|existing| {
                    debug!(
                        security_group_id = %group.id,
                        region = %region,
                        group_id = %existing,
                        "re-using existing security group"
                    );
                })?,
            Err(err) => return Err(failed(err)),
        };

        let tag_fault = self
            .compute
            .create_tags(region, &group_id, tags)
            .await
            .err()
            .map(|err| regional_fault(&group.id, region, err));
        Ok(RegionalGroup {
            region: region.clone(),
            group_id,
            tag_fault,
        })
    }

    async fn replicate_rules(&self, group: &SecurityGroup) -> Result<(), PhaseFault> {
        let mut grants = Vec::new();
        for (region, group_id) in &group.real_security_groups {
            for direction in [RuleDirection::Inbound, RuleDirection::Outbound] {
                for rule in group.rules(direction) {
                    grants.push((region, group_id.as_str(), direction, rule));
                }
            }
        }

        let outcomes = settle(grants.into_iter().map(|(region, group_id, direction, rule)| {
            self.grant(&group.id, region, group_id, direction, rule)
        }))
        .await;
        outcomes
            .into_result()
            .map(|_| ())
            .map_err(|fault| fault.in_phase(Phase::RuleCreate))
    }

    async fn grant(
        &self,
        entity_id: &str,
        region: &Region,
        group_id: &str,
        direction: RuleDirection,
        rule: &Rule,
    ) -> Result<(), Fault> {
        let permission = IpPermission::from(rule);
        let result = match direction {
            RuleDirection::Inbound => {
                self.compute
                    .authorize_ingress(region, group_id, &permission)
                    .await
            }
            RuleDirection::Outbound => {
                self.compute
                    .authorize_egress(region, group_id, &permission)
                    .await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => {
                debug!(security_group_id = %entity_id, region = %region, rule = %rule, "rule already present");
                Ok(())
            }
            Err(err) => {
                warn!(
                    security_group_id = %entity_id,
                    region = %region,
                    direction = %direction,
                    rule = %rule,
                    error = %err,
                    "rule replication failed"
                );
                Err(regional_fault(entity_id, region, err))
            }
        }
    }

    async fn revoke(
        &self,
        entity_id: &str,
        region: &Region,
        group_id: &str,
        direction: RuleDirection,
        rule: &Rule,
    ) -> Result<(), Fault> {
        let permission = IpPermission::from(rule);
        let result = match direction {
            RuleDirection::Inbound => {
                self.compute
                    .revoke_ingress(region, group_id, &permission)
                    .await
            }
            RuleDirection::Outbound => {
                self.compute
                    .revoke_egress(region, group_id, &permission)
                    .await
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(security_group_id = %entity_id, region = %region, rule = %rule, "rule already absent");
                Ok(())
            }
            Err(err) => Err(regional_fault(entity_id, region, err)),
        }
    }

    /// Deletes the real group in every region and clears live state.
    ///
    /// A group that is already gone counts as deleted. Live state is
    /// cleared even when a region fails.
    ///
    /// # Errors
    ///
    /// Returns the first regional fault after every region was attempted.
    pub async fn destroy(&self, group: &mut SecurityGroup) -> Result<(), Fault> {
        let (regions, listing_fault) = match self.compute.describe_regions().await {
            Ok(regions) => (regions, None),
            Err(err) => {
                warn!(
                    security_group_id = %group.id,
                    error = %err,
                    "region listing failed; deleting recorded regions only"
                );
                let recorded = group.real_security_groups.keys().cloned().collect();
                (recorded, Some(Fault::remote(&group.id, err)))
            }
        };

        let name = group.name.as_str();
        let entity_id = group.id.as_str();
        let outcomes = settle(regions.iter().map(|region| async move {
            match self.compute.delete_security_group(region, name).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_not_found() => {
                    debug!(security_group_id = %entity_id, region = %region, "security group already absent");
                    Ok(())
                }
                Err(err) => {
                    warn!(
                        security_group_id = %entity_id,
                        region = %region,
                        error = %err,
                        "security group deletion failed"
                    );
                    Err(regional_fault(entity_id, region, err))
                }
            }
        }))
        .await;

        let result = listing_fault.map_or_else(|| outcomes.into_result().map(|_| ()), Err);
        group.mark_stopped();
        info!(security_group_id = %group.id, "security group destroyed");
        result
    }

    /// Re-describes the group by name in every region and rebuilds the
    /// region map from live data. A region without the group is a
    /// warning; the group counts as running while any region has one.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::SynchronizationFailed`] when regions cannot be
    /// listed or a lookup fails.
    pub async fn transform_from_aws(&self, group: &mut SecurityGroup) -> Result<(), Fault> {
        let regions = self
            .compute
            .describe_regions()
            .await
            .map_err(|err| Fault::remote(&group.id, err).into_sync_failure())?;

        let name = group.name.as_str();
        let outcomes = settle(regions.iter().map(|region| async move {
            self.compute
                .describe_security_group(region, name)
                .await
                .map(|found| (region, found))
                .map_err(|err| (region, err))
        }))
        .await;

        let mut live = std::collections::BTreeMap::new();
        let mut sync_fault = None;
        for outcome in outcomes.into_outcomes() {
            match outcome {
                Ok((region, Some(group_id))) => {
                    live.insert(region.clone(), group_id);
                }
                Ok((region, None)) => {
                    warn!(security_group_id = %group.id, region = %region, "security group missing in region");
                }
                Err((region, err)) => {
                    warn!(security_group_id = %group.id, region = %region, error = %err, "security group lookup failed");
                    sync_fault.get_or_insert_with(|| {
                        regional_fault(&group.id, region, err).into_sync_failure()
                    });
                }
            }
        }

        group.real_security_groups = live;
        if group.real_security_groups.is_empty() {
            group.running_since = None;
        } else if group.running_since.is_none() {
            group.running_since = Some(Utc::now());
        }
        debug!(
            security_group_id = %group.id,
            regions = group.real_security_groups.len(),
            "security group synchronised"
        );
        sync_fault.map_or(Ok(()), Err)
    }

    /// Adds a rule; replicates it to every recorded real group when the
    /// group is running. Returns `false` when the rule was already present.
    ///
    /// # Errors
    ///
    /// Returns the first regional fault. The rule stays in the local list.
    pub async fn add_rule(
        &self,
        group: &mut SecurityGroup,
        direction: RuleDirection,
        rule: Rule,
    ) -> Result<bool, Fault> {
        if group.rules(direction).contains(&rule) {
            return Ok(false);
        }
        group.rules_mut(direction).push(rule.clone());
        if group.is_running() {
            let entity_id = group.id.as_str();
            settle(group.real_security_groups.iter().map(|(region, group_id)| {
                self.grant(entity_id, region, group_id, direction, &rule)
            }))
            .await
            .into_result()?;
        }
        info!(security_group_id = %group.id, direction = %direction, rule = %rule, "rule added");
        Ok(true)
    }

    /// Removes a rule; revokes it from every recorded real group when the
    /// group is running. Returns `false` when the rule was not present.
    ///
    /// # Errors
    ///
    /// Returns the first regional fault. The rule stays removed locally.
    pub async fn remove_rule(
        &self,
        group: &mut SecurityGroup,
        direction: RuleDirection,
        rule: &Rule,
    ) -> Result<bool, Fault> {
        let rules = group.rules_mut(direction);
        let Some(index) = rules.iter().position(|existing| existing == rule) else {
            return Ok(false);
        };
        rules.remove(index);
        if group.is_running() {
            let entity_id = group.id.as_str();
            settle(group.real_security_groups.iter().map(|(region, group_id)| {
                self.revoke(entity_id, region, group_id, direction, rule)
            }))
            .await
            .into_result()?;
        }
        info!(security_group_id = %group.id, direction = %direction, rule = %rule, "rule removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests;
