//! Core library for provisioning multi-region compute networks.
//!
//! A [`Network`] groups hosts and the security groups that guard them. The
//! [`NetworkOrchestrator`] replicates every security group into every
//! region, launches each host against the real group of its region, rolls
//! the whole network back when any phase fails, and converges persisted
//! snapshots against live provider state. Remote compute and persistence
//! are capabilities ([`RemoteCompute`], [`KeyValueStore`]) so the same
//! orchestration runs against a real provider or the scripted double in
//! [`test_support`].

pub mod bootstrap;
pub mod compute;
pub mod config;
pub mod fault;
pub mod host;
pub mod janitor;
pub mod model;
pub mod network;
pub mod security_group;
pub mod settle;
pub mod store;
pub mod telemetry;
pub mod test_support;

pub use bootstrap::{AccountBootstrap, BootstrapError, BootstrapSummary, Preparation};
pub use compute::{ComputeError, ComputeFuture, Region, RemoteCompute};
pub use config::{ConfigError, FleetConfig};
pub use fault::{Fault, Phase, PhaseFault};
pub use host::{CommandOutcome, HostController, StreamEvent, SyncReport};
pub use janitor::{Janitor, JanitorError, SweepSummary};
pub use model::{
    DesiredState, Host, InstanceSize, InstanceState, Network, Rule, RuleDirection, SecurityGroup,
};
pub use network::{
    BuildOutcome, CompensationStep, NetworkOrchestrator, RollbackCoordinator, RollbackReport,
    SyncSummary,
};
pub use security_group::SecurityGroupManager;
pub use settle::{Settled, settle};
pub use store::{DocumentStore, FsStore, KeyValueStore, MemoryStore, StoreError};
pub use telemetry::{TelemetryError, init_tracing};
