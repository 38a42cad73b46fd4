//! Unit tests for the janitor module.

use rstest::{fixture, rstest};

use super::*;
use crate::compute::{LaunchSpec, TAG_ID};
use crate::model::InstanceSize;
use crate::test_support::{InjectedFailure, SCRIPTED_IMAGE_ID, ScriptedCompute};

#[fixture]
fn cloud() -> ScriptedCompute {
    ScriptedCompute::with_regions(&["us-east-1", "eu-west-1"])
}

/// Leaves a tagged group and a running instance inside it behind.
async fn orphan(cloud: &ScriptedCompute, region: &str, network_id: &str, name: &str) -> String {
    let region = Region::new(region);
    let tags = [Tag::new(TAG_NETWORK_ID, network_id), Tag::new(TAG_ID, name)];
    let group_id = cloud
        .create_security_group(&region, name, name, "vpc-test")
        .await
        .expect("create group");
    cloud
        .create_tags(&region, &group_id, &tags)
        .await
        .expect("tag group");
    let spec = LaunchSpec {
        image_id: String::from(SCRIPTED_IMAGE_ID),
        size: InstanceSize::default(),
        key_name: String::from("test-key"),
        security_group_ids: vec![group_id],
        tags: tags.to_vec(),
        user_data: String::new(),
        availability_zone: None,
    };
    cloud.run_instance(&region, &spec).await.expect("launch")
}

#[rstest]
#[tokio::test]
async fn sweep_deletes_only_tagged_resources(cloud: ScriptedCompute) {
    orphan(&cloud, "us-east-1", "net-1", "web").await;
    orphan(&cloud, "eu-west-1", "net-1", "web").await;
    let survivor = orphan(&cloud, "us-east-1", "net-2", "db").await;

    let summary = Janitor::new(&cloud)
        .sweep("net-1")
        .await
        .expect("sweep should succeed");

    assert_eq!(
        summary,
        SweepSummary {
            terminated_instances: 2,
            deleted_security_groups: 2,
        }
    );
    assert_eq!(cloud.group_count(), 1);
    assert!(cloud.group_id("us-east-1", "db").is_some());
    assert_eq!(
        cloud.instance(&survivor).and_then(|live| live.state),
        Some(InstanceState::Pending)
    );
}

#[rstest]
#[tokio::test]
async fn sweep_skips_already_terminated_instances(cloud: ScriptedCompute) {
    let instance_id = orphan(&cloud, "us-east-1", "net-1", "web").await;
    cloud.mutate_instance(&instance_id, |live| {
        live.state = Some(InstanceState::Terminated);
    });

    let summary = Janitor::new(&cloud).sweep("net-1").await.expect("sweep");

    assert_eq!(summary.terminated_instances, 0);
    assert_eq!(summary.deleted_security_groups, 1);
    assert!(cloud.calls_to("terminate_instance").is_empty());
}

#[rstest]
#[tokio::test]
async fn sweep_of_a_clean_account_is_a_no_op(cloud: ScriptedCompute) {
    let summary = Janitor::new(&cloud).sweep("net-1").await.expect("sweep");

    assert_eq!(summary, SweepSummary::default());
}

#[rstest]
#[case("")]
#[case("   ")]
#[tokio::test]
async fn sweep_rejects_blank_network_ids(cloud: ScriptedCompute, #[case] network_id: &str) {
    let err = Janitor::new(&cloud)
        .sweep(network_id)
        .await
        .expect_err("blank id should fail");

    assert_eq!(
        err,
        JanitorError::InvalidInput {
            field: String::from("network_id")
        }
    );
    assert!(cloud.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn sweep_surfaces_provider_failures(cloud: ScriptedCompute) {
    orphan(&cloud, "eu-west-1", "net-1", "web").await;
    cloud.inject(InjectedFailure::on("terminate_instance").in_region("eu-west-1"));

    let err = Janitor::new(&cloud)
        .sweep("net-1")
        .await
        .expect_err("terminate failure should surface");

    assert!(matches!(err, JanitorError::Remote(ComputeError::Remote { .. })));
    assert_eq!(cloud.group_count(), 1);
}

#[rstest]
#[tokio::test]
async fn sweep_fails_when_tagged_resources_survive(cloud: ScriptedCompute) {
    orphan(&cloud, "us-east-1", "net-1", "web").await;
    cloud.inject(
        InjectedFailure::on("delete_security_group").with_error(ComputeError::NotFound {
            resource: String::from("security_group"),
            id: String::from("web"),
        }),
    );

    let err = Janitor::new(&cloud)
        .sweep("net-1")
        .await
        .expect_err("surviving group should fail the sweep");

    let JanitorError::NotClean { message } = err else {
        panic!("expected NotClean, got {err:?}");
    };
    assert!(message.contains("security groups remaining: 1"), "{message}");
}
