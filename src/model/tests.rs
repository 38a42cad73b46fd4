//! Unit tests for the entity model.

use std::str::FromStr;

use rstest::rstest;

use super::*;
use crate::compute::Region;

#[rstest]
#[case(Rule::single_port("10.0.0.0/16", 22), Rule::range("10.0.0.0/16", 22, 22), true)]
#[case(Rule::single_port("10.0.0.0/16", 22), Rule::single_port("10.0.0.0/8", 22), false)]
#[case(Rule::range("0.0.0.0/0", 80, 90), Rule::range("0.0.0.0/0", 80, 91), false)]
fn rules_are_equal_iff_all_fields_match(#[case] lhs: Rule, #[case] rhs: Rule, #[case] equal: bool) {
    assert_eq!(lhs == rhs, equal);
}

#[rstest]
fn rule_display_collapses_single_ports() {
    assert_eq!(Rule::single_port("10.0.0.0/16", 22).to_string(), "10.0.0.0/16:22");
    assert_eq!(Rule::range("0.0.0.0/0", 8000, 8080).to_string(), "0.0.0.0/0:8000-8080");
}

#[rstest]
#[case(InstanceState::Pending, Some(InstanceState::Running))]
#[case(InstanceState::Stopping, Some(InstanceState::Stopped))]
#[case(InstanceState::ShuttingDown, Some(InstanceState::Terminated))]
#[case(InstanceState::Running, None)]
#[case(InstanceState::Terminated, None)]
fn transitional_states_settle_into_terminal_states(
    #[case] state: InstanceState,
    #[case] expected: Option<InstanceState>,
) {
    assert_eq!(state.settles_into(), expected);
}

#[rstest]
fn instance_size_parses_provider_names() {
    assert_eq!(InstanceSize::from_str("t3.medium"), Ok(InstanceSize::T3Medium));
    assert_eq!(
        InstanceSize::from_str("x9.huge"),
        Err(UnknownInstanceSize(String::from("x9.huge")))
    );
}

#[rstest]
fn reconcile_prefers_live_values() {
    let kept = reconcile(String::from("old"), None);
    assert_eq!(kept.value, "old");
    assert!(kept.defaulted);

    let replaced = reconcile(String::from("old"), Some(String::from("new")));
    assert_eq!(replaced.value, "new");
    assert!(!replaced.defaulted);
}

#[rstest]
fn settle_guard_admits_one_permit_across_clones() {
    let host = Host::new("web");
    let clone = host.clone();

    let permit = host
        .settle_guard()
        .try_acquire()
        .expect("first acquire should succeed");
    assert!(clone.settle_guard().is_held());
    assert!(clone.settle_guard().try_acquire().is_none());

    drop(permit);
    assert!(!host.settle_guard().is_held());
    assert!(clone.settle_guard().try_acquire().is_some());
}

#[rstest]
fn user_data_exports_escaped_identity_before_script() {
    let mut host = Host::new("web")
        .with_id("host-1")
        .with_initial_script("echo ready");
    host.network_id = Some(String::from("net 1"));

    assert_eq!(
        host.user_data(),
        "#!/bin/bash\nexport NETFLEET_HOST_ID=host-1\nexport NETFLEET_NETWORK_ID='net 1'\necho ready\n"
    );
}

#[rstest]
fn security_group_tracks_real_groups_per_region() {
    let mut group = SecurityGroup::new("web").with_id("sg-logical");
    let region = Region::from("eu-west-1");
    group
        .real_security_groups
        .insert(region.clone(), String::from("sg-123"));
    group.running_since = Some(chrono::Utc::now());

    assert_eq!(group.real_group(&region), Some("sg-123"));
    assert!(group.owns_real_group("sg-123"));

    group.mark_stopped();
    assert!(group.real_security_groups.is_empty());
    assert!(!group.is_running());
}

#[rstest]
fn network_document_round_trips_through_json() {
    let mut network = Network::new("staging");
    let group = SecurityGroup::new("web")
        .with_id("sg-1")
        .with_inbound(Rule::single_port("0.0.0.0/0", 443));
    network.hosts.push(
        Host::new("web-1")
            .with_id("host-1")
            .in_region("us-east-1")
            .with_security_group(&group),
    );
    network.security_groups.push(group);

    let encoded = serde_json::to_string(&network).expect("encode");
    assert!(encoded.contains("\"runningSince\":null"));
    assert!(encoded.contains("\"portRangeStart\":443"));

    let decoded: Network = serde_json::from_str(&encoded).expect("decode");
    assert_eq!(decoded.id, network.id);
    assert_eq!(decoded.security_groups, network.security_groups);
    let host = decoded.host("host-1").expect("host present");
    assert_eq!(host.security_group_id.as_deref(), Some("sg-1"));
    assert_eq!(host.size, InstanceSize::T2Micro);
}
