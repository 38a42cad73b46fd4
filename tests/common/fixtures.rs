//! Shared fixtures for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Include this module with:
//!
//! ```rust
//! #[path = "common/fixtures.rs"]
//! mod fixtures;
//! ```

use netfleet::test_support::ScriptedCompute;
use netfleet::{FleetConfig, Host, MemoryStore, Network, NetworkOrchestrator, Rule, SecurityGroup};

/// Regions every scripted cloud exposes.
pub const REGIONS: [&str; 3] = ["us-east-1", "eu-west-1", "ap-south-1"];

/// Network id used by [`three_host_network`].
pub const NETWORK_ID: &str = "net-itest";

/// Logical id of the single security group in [`three_host_network`].
pub const GROUP_ID: &str = "sg-ssh";

/// Configuration that never sleeps between command polls.
#[must_use]
pub fn fast_config() -> FleetConfig {
    FleetConfig {
        command_poll_interval_ms: 0,
        command_max_attempts: 3,
        ..FleetConfig::builtin_defaults()
    }
}

/// A scripted cloud and an orchestrator wired to it over an in-memory store.
#[must_use]
pub fn orchestrator() -> (ScriptedCompute, NetworkOrchestrator<ScriptedCompute, MemoryStore>) {
    let cloud = ScriptedCompute::with_regions(&REGIONS);
    let orchestrator = NetworkOrchestrator::new(cloud.clone(), MemoryStore::new(), fast_config());
    (cloud, orchestrator)
}

/// One SSH security group and one host per region, numbered `host-1`..`host-3`.
#[must_use]
pub fn three_host_network() -> Network {
    let mut network = Network::new("integration");
    network.id = NETWORK_ID.to_owned();
    let group = SecurityGroup::new("ssh")
        .with_id(GROUP_ID)
        .with_inbound(Rule::single_port("10.0.0.0/16", 22));
    for (index, region) in REGIONS.iter().enumerate() {
        let host_id = format!("host-{}", index + 1);
        network.hosts.push(
            Host::new(host_id.as_str())
                .with_id(host_id.as_str())
                .in_region(*region)
                .with_security_group(&group),
        );
    }
    network.security_groups.push(group);
    network
}
