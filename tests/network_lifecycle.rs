//! End-to-end lifecycle properties exercised through the public API.

#[path = "common/fixtures.rs"]
mod fixtures;

use fixtures::{GROUP_ID, NETWORK_ID, REGIONS, fast_config, orchestrator, three_host_network};
use netfleet::compute::{ComputeError, IpPermission, TAG_NAME};
use netfleet::test_support::{InjectedFailure, ScriptedCompute};
use netfleet::{
    BuildOutcome, Host, HostController, InstanceState, Network, Phase, Rule, RuleDirection,
    SecurityGroup, SecurityGroupManager,
};
use rstest::rstest;

#[rstest]
#[tokio::test]
async fn creating_a_group_twice_is_idempotent() {
    let cloud = ScriptedCompute::with_regions(&REGIONS);
    let manager = SecurityGroupManager::new(&cloud);
    let mut group = SecurityGroup::new("web").with_id("sg-web");

    manager.create(&mut group).await.expect("first create");
    let first = group.real_security_groups.clone();
    manager.create(&mut group).await.expect("second create");

    assert_eq!(group.real_security_groups, first);
    assert_eq!(cloud.group_count(), REGIONS.len());
}

#[rstest]
#[tokio::test]
async fn a_created_host_converges_to_running() {
    let cloud = ScriptedCompute::with_regions(&REGIONS);
    let config = fast_config();
    let mut group = SecurityGroup::new("web").with_id("sg-web");
    SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect("group");
    let mut host = Host::new("app")
        .with_id("host-app")
        .in_region("eu-west-1")
        .with_security_group(&group);

    HostController::new(&cloud, &config)
        .create(&mut host, &group)
        .await
        .expect("host");

    assert_eq!(host.state, Some(InstanceState::Running));
    let instance_id = host.instance_id.expect("instance id recorded");
    assert_eq!(
        cloud.instance_profile(&instance_id).as_deref(),
        Some(config.instance_profile_name.as_str())
    );
}

#[rstest]
#[tokio::test]
async fn a_failed_host_rolls_the_whole_network_back() {
    let (cloud, orchestrator) = orchestrator();
    cloud.inject(InjectedFailure::on("run_instance").for_target("host-2"));
    let mut network = three_host_network();

    let outcome = orchestrator.build(&mut network).await.expect("outcome");

    let BuildOutcome::RolledBack { fault, .. } = outcome else {
        panic!("expected a rollback");
    };
    assert_eq!(fault.phase, Phase::HostCreate);
    assert!(network.running_since.is_none());
    assert!(
        cloud
            .instances()
            .iter()
            .all(|live| live.state == Some(InstanceState::Terminated))
    );
    assert_eq!(cloud.calls_to("terminate_instance").len(), 2);
    assert_eq!(cloud.group_count(), 0);

    let stored: Network = orchestrator
        .documents()
        .load(NETWORK_ID)
        .await
        .expect("rolled back snapshot persisted");
    assert!(stored.running_since.is_none());
}

#[rstest]
#[tokio::test]
async fn one_failing_region_keeps_the_others() {
    let cloud = ScriptedCompute::with_regions(&REGIONS);
    cloud.inject(InjectedFailure::on("create_security_group").in_region("eu-west-1"));
    let mut group = SecurityGroup::new("web").with_id("sg-web");

    let err = SecurityGroupManager::new(&cloud)
        .create(&mut group)
        .await
        .expect_err("regional failure surfaces");

    assert_eq!(err.phase, Phase::SecurityGroupCreate);
    assert!(err.to_string().contains("eu-west-1"), "{err}");
    let regions: Vec<&str> = group
        .real_security_groups
        .keys()
        .map(|region| region.as_str())
        .collect();
    assert_eq!(regions, vec!["ap-south-1", "us-east-1"]);
}

#[rstest]
#[tokio::test]
async fn synchronisation_keeps_names_and_reports_vanished_instances() {
    let (cloud, orchestrator) = orchestrator();
    let mut network = three_host_network();
    orchestrator.build(&mut network).await.expect("build");
    let config = fast_config();
    let controller = HostController::new(&cloud, &config);
    let groups = network.security_groups.clone();

    let host = network.host_mut("host-1").expect("host");
    let instance_id = host.instance_id.clone().expect("instance id");
    cloud.mutate_instance(&instance_id, |live| {
        live.tags.remove(TAG_NAME);
    });
    let report = controller
        .transform_from_aws(host, &groups)
        .await
        .expect("sync tolerates missing tags");
    assert_eq!(host.name, "host-1");
    assert!(report.defaulted.contains(&"name"));

    cloud.forget_instance(&instance_id);
    let err = controller
        .transform_from_aws(host, &groups)
        .await
        .expect_err("vanished instance");
    assert_eq!(err.code(), "resource_not_found");
}

#[rstest]
#[tokio::test]
async fn an_added_rule_reaches_each_recorded_region_once() {
    let cloud = ScriptedCompute::with_regions(&["us-east-1", "eu-west-1"]);
    let manager = SecurityGroupManager::new(&cloud);
    let mut group = SecurityGroup::new("web").with_id("sg-web");
    manager.create(&mut group).await.expect("group");
    cloud.clear_calls();

    let added = manager
        .add_rule(
            &mut group,
            RuleDirection::Inbound,
            Rule::single_port("10.0.0.0/16", 22),
        )
        .await
        .expect("rule");

    assert!(added);
    let calls = cloud.calls_to("authorize_ingress");
    assert_eq!(calls.len(), 2);
    for region in ["us-east-1", "eu-west-1"] {
        assert_eq!(
            cloud.group_ingress(region, "web"),
            vec![IpPermission {
                protocol: String::from("tcp"),
                cidr: String::from("10.0.0.0/16"),
                from_port: 22,
                to_port: 22,
            }]
        );
    }
}

#[rstest]
#[tokio::test]
async fn duplicate_hosts_leave_the_member_list_alone() {
    let (_cloud, orchestrator) = orchestrator();
    let mut network = three_host_network();
    let before: Vec<String> = network.hosts.iter().map(|host| host.id.clone()).collect();

    let err = orchestrator
        .add_host(&mut network, Host::new("copy").with_id("host-3"))
        .await
        .expect_err("duplicate");

    assert_eq!(err.code(), "duplicate_member");
    let after: Vec<String> = network.hosts.iter().map(|host| host.id.clone()).collect();
    assert_eq!(before, after);
}

#[rstest]
#[tokio::test]
async fn a_network_survives_build_get_and_delete() {
    let (cloud, orchestrator) = orchestrator();
    let mut network = three_host_network();

    assert_eq!(
        orchestrator.build(&mut network).await.expect("build"),
        BuildOutcome::Built
    );
    let loaded = orchestrator.get(NETWORK_ID).await.expect("get");
    assert!(loaded.is_running());
    assert_eq!(
        loaded
            .security_group(GROUP_ID)
            .map(|group| group.real_security_groups.len()),
        Some(REGIONS.len())
    );

    let mut loaded = loaded;
    orchestrator.delete(&mut loaded).await.expect("delete");

    assert_eq!(cloud.group_count(), 0);
    let err = orchestrator.get(NETWORK_ID).await.expect_err("deleted");
    assert_eq!(err.code(), "resource_not_found");
}

#[rstest]
#[tokio::test]
async fn vanished_groups_are_tolerated_on_delete() {
    let (cloud, orchestrator) = orchestrator();
    let mut network = three_host_network();
    orchestrator.build(&mut network).await.expect("build");
    cloud.inject(
        InjectedFailure::on("delete_security_group")
            .in_region("ap-south-1")
            .with_error(ComputeError::NotFound {
                resource: String::from("security_group"),
                id: String::from("ssh"),
            }),
    );

    orchestrator.delete(&mut network).await.expect("delete");

    assert!(!network.is_running());
}
