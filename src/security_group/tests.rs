//! Unit tests for security group replication.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{InjectedFailure, ScriptedCompute};

const REGIONS: [&str; 3] = ["us-east-1", "eu-west-1", "ap-south-1"];

#[fixture]
fn cloud() -> ScriptedCompute {
    ScriptedCompute::with_regions(&REGIONS)
}

#[fixture]
fn group() -> SecurityGroup {
    let mut group = SecurityGroup::new("web")
        .with_id("sg-logical")
        .with_inbound(Rule::single_port("0.0.0.0/0", 22))
        .with_outbound(Rule::range("0.0.0.0/0", 0, 65535));
    group.network_id = Some(String::from("net-1"));
    group
}

#[rstest]
#[tokio::test]
async fn create_replicates_group_and_rules_to_every_region(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect("create");

    assert!(group.is_running());
    assert_eq!(group.real_security_groups.len(), 3);
    for region in REGIONS {
        let recorded = group.real_group(&Region::from(region)).map(str::to_owned);
        assert_eq!(recorded, cloud.group_id(region, "web"));
        let tags = cloud.group_tags(region, "web");
        assert_eq!(tags.get(TAG_ID).map(String::as_str), Some("sg-logical"));
        assert_eq!(tags.get(TAG_NETWORK_ID).map(String::as_str), Some("net-1"));
        assert_eq!(cloud.group_ingress(region, "web").len(), 1);
        assert_eq!(cloud.group_egress(region, "web").len(), 1);
    }
}

#[rstest]
#[tokio::test]
async fn create_is_idempotent(cloud: ScriptedCompute, mut group: SecurityGroup) {
    let manager = SecurityGroupManager::new(&cloud);
    manager.create(&mut group).await.expect("first create");
    let first = group.real_security_groups.clone();

    manager.create(&mut group).await.expect("second create");

    assert_eq!(group.real_security_groups, first);
    assert_eq!(cloud.group_count(), 3);
}

#[rstest]
#[tokio::test]
async fn failing_region_does_not_discard_its_siblings(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    cloud.inject(InjectedFailure::on("create_security_group").in_region("eu-west-1"));

    let err = SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect_err("region failure should surface");

    assert_eq!(err.phase, Phase::SecurityGroupCreate);
    assert!(err.to_string().contains("eu-west-1"), "fault was {err}");
    assert_eq!(err.fault.entity_id(), "sg-logical");
    let recorded: Vec<&str> = group
        .real_security_groups
        .keys()
        .map(Region::as_str)
        .collect();
    assert_eq!(recorded, vec!["ap-south-1", "us-east-1"]);
    assert!(group.is_running());
}

#[rstest]
#[tokio::test]
async fn unlisted_regions_are_an_unclassified_fault(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    cloud.inject(InjectedFailure::on("describe_regions"));

    let err = SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect_err("region listing failure surfaces");

    assert_eq!(err.phase, Phase::Unclassified);
    assert_eq!(err.fault.entity_id(), "sg-logical");
    assert!(group.real_security_groups.is_empty());
    assert!(cloud.calls_to("create_security_group").is_empty());
}

#[rstest]
#[tokio::test]
async fn tag_failure_keeps_the_created_group(cloud: ScriptedCompute, mut group: SecurityGroup) {
    cloud.inject(InjectedFailure::on("create_tags").in_region("us-east-1"));

    let err = SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect_err("tag failure should surface");

    assert_eq!(err.phase, Phase::SecurityGroupCreate);
    assert_eq!(group.real_security_groups.len(), 3);
}

#[rstest]
#[tokio::test]
async fn rule_failure_is_classified_separately(cloud: ScriptedCompute, mut group: SecurityGroup) {
    cloud.inject(InjectedFailure::on("authorize_egress"));

    let err = SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect_err("rule failure should surface");

    assert_eq!(err.phase, Phase::RuleCreate);
    assert_eq!(group.real_security_groups.len(), 3);
    assert_eq!(cloud.calls_to("authorize_ingress").len(), 3);
}

#[rstest]
#[tokio::test]
async fn missing_id_is_a_precondition_fault(cloud: ScriptedCompute) {
    let mut group = SecurityGroup::new("web");

    let err = SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect_err("missing id should fail");

    assert_eq!(err.fault.code(), "missing_precondition");
    assert!(cloud.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn destroy_tolerates_absent_groups_and_clears_state(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    let manager = SecurityGroupManager::new(&cloud);
    manager.create(&mut group).await.expect("create");
    cloud.seed_security_group("ap-south-1", "unrelated");

    manager.destroy(&mut group).await.expect("destroy");
    assert!(!group.is_running());
    assert!(group.real_security_groups.is_empty());
    assert_eq!(cloud.group_count(), 1);

    manager.destroy(&mut group).await.expect("second destroy");
}

#[rstest]
#[tokio::test]
async fn destroy_reports_regional_failures_but_still_clears_state(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    let manager = SecurityGroupManager::new(&cloud);
    manager.create(&mut group).await.expect("create");
    cloud.inject(InjectedFailure::on("delete_security_group").in_region("us-east-1"));

    let err = manager
        .destroy(&mut group)
        .await
        .expect_err("regional failure should surface");

    assert!(err.to_string().contains("us-east-1"));
    assert!(group.real_security_groups.is_empty());
    assert_eq!(cloud.group_count(), 1);
}

#[rstest]
#[tokio::test]
async fn synchronisation_rebuilds_the_region_map(cloud: ScriptedCompute, mut group: SecurityGroup) {
    let seeded = cloud.seed_security_group("eu-west-1", "web");
    group
        .real_security_groups
        .insert(Region::from("us-east-1"), String::from("sg-stale"));

    SecurityGroupManager::new(&cloud)
        .transform_from_aws(&mut group)
        .await
        .expect("sync");

    assert_eq!(group.real_security_groups.len(), 1);
    assert_eq!(
        group.real_group(&Region::from("eu-west-1")),
        Some(seeded.as_str())
    );
    assert!(group.is_running());
}

#[rstest]
#[tokio::test]
async fn synchronisation_without_live_groups_marks_stopped(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    group.running_since = Some(Utc::now());
    group
        .real_security_groups
        .insert(Region::from("us-east-1"), String::from("sg-gone"));

    SecurityGroupManager::new(&cloud)
        .transform_from_aws(&mut group)
        .await
        .expect("sync");

    assert!(group.real_security_groups.is_empty());
    assert!(!group.is_running());
}

#[rstest]
#[tokio::test]
async fn adding_a_rule_to_a_running_group_authorizes_once_per_region() {
    let cloud = ScriptedCompute::with_regions(&["us-east-1", "eu-west-1"]);
    let mut group = SecurityGroup::new("ops").with_id("sg-ops");
    let manager = SecurityGroupManager::new(&cloud);
    manager.create(&mut group).await.expect("create");
    cloud.clear_calls();

    let added = manager
        .add_rule(
            &mut group,
            RuleDirection::Inbound,
            Rule::single_port("10.0.0.0/16", 22),
        )
        .await
        .expect("add rule");

    assert!(added);
    let calls = cloud.calls_to("authorize_ingress");
    assert_eq!(calls.len(), 2);
    for region in ["us-east-1", "eu-west-1"] {
        let permissions = cloud.group_ingress(region, "ops");
        assert_eq!(permissions.len(), 1);
        let permission = permissions.first().expect("permission");
        assert_eq!((permission.from_port, permission.to_port), (22, 22));
        assert_eq!(permission.cidr, "10.0.0.0/16");
    }
}

#[rstest]
#[tokio::test]
async fn rule_changes_on_a_stopped_group_stay_local(
    cloud: ScriptedCompute,
    mut group: SecurityGroup,
) {
    let manager = SecurityGroupManager::new(&cloud);
    let rule = Rule::single_port("0.0.0.0/0", 443);

    assert!(
        manager
            .add_rule(&mut group, RuleDirection::Inbound, rule.clone())
            .await
            .expect("add")
    );
    assert!(
        !manager
            .add_rule(&mut group, RuleDirection::Inbound, rule.clone())
            .await
            .expect("duplicate add")
    );
    assert_eq!(group.inbound.len(), 2);
    assert!(cloud.calls().is_empty());

    assert!(
        manager
            .remove_rule(&mut group, RuleDirection::Inbound, &rule)
            .await
            .expect("remove")
    );
    assert_eq!(group.inbound, vec![Rule::single_port("0.0.0.0/0", 22)]);
}

#[rstest]
#[tokio::test]
async fn removing_a_rule_revokes_it_everywhere(cloud: ScriptedCompute, mut group: SecurityGroup) {
    let manager = SecurityGroupManager::new(&cloud);
    manager.create(&mut group).await.expect("create");
    let rule = Rule::single_port("0.0.0.0/0", 22);

    let removed = manager
        .remove_rule(&mut group, RuleDirection::Inbound, &rule)
        .await
        .expect("remove");

    assert!(removed);
    assert_eq!(cloud.calls_to("revoke_ingress").len(), 3);
    for region in REGIONS {
        assert!(cloud.group_ingress(region, "web").is_empty());
    }
}
