//! Instance lifecycle states and instance types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a compute instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Launch or restart in progress.
    Pending,
    /// Booted.
    Running,
    /// Termination in progress.
    ShuttingDown,
    /// Gone; terminal.
    Terminated,
    /// Stop in progress.
    Stopping,
    /// Powered off.
    Stopped,
}

impl InstanceState {
    /// Returns the state a transitional state settles into.
    #[must_use]
    pub const fn settles_into(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Running),
            Self::Stopping => Some(Self::Stopped),
            Self::ShuttingDown => Some(Self::Terminated),
            Self::Running | Self::Stopped | Self::Terminated => None,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        formatter.write_str(label)
    }
}

/// State a caller may request for a host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DesiredState {
    /// Power on.
    Running,
    /// Power off.
    Stopped,
    /// Terminate.
    Terminated,
}

/// Supported instance types.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum InstanceSize {
    /// `t2.nano`
    #[serde(rename = "t2.nano")]
    T2Nano,
    /// `t2.micro`
    #[default]
    #[serde(rename = "t2.micro")]
    T2Micro,
    /// `t2.small`
    #[serde(rename = "t2.small")]
    T2Small,
    /// `t2.medium`
    #[serde(rename = "t2.medium")]
    T2Medium,
    /// `t2.large`
    #[serde(rename = "t2.large")]
    T2Large,
    /// `t2.xlarge`
    #[serde(rename = "t2.xlarge")]
    T2Xlarge,
    /// `t3.micro`
    #[serde(rename = "t3.micro")]
    T3Micro,
    /// `t3.small`
    #[serde(rename = "t3.small")]
    T3Small,
    /// `t3.medium`
    #[serde(rename = "t3.medium")]
    T3Medium,
    /// `m5.large`
    #[serde(rename = "m5.large")]
    M5Large,
    /// `c5.large`
    #[serde(rename = "c5.large")]
    C5Large,
}

impl InstanceSize {
    /// Provider type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::T2Nano => "t2.nano",
            Self::T2Micro => "t2.micro",
            Self::T2Small => "t2.small",
            Self::T2Medium => "t2.medium",
            Self::T2Large => "t2.large",
            Self::T2Xlarge => "t2.xlarge",
            Self::T3Micro => "t3.micro",
            Self::T3Small => "t3.small",
            Self::T3Medium => "t3.medium",
            Self::M5Large => "m5.large",
            Self::C5Large => "c5.large",
        }
    }

    const ALL: [Self; 11] = [
        Self::T2Nano,
        Self::T2Micro,
        Self::T2Small,
        Self::T2Medium,
        Self::T2Large,
        Self::T2Xlarge,
        Self::T3Micro,
        Self::T3Small,
        Self::T3Medium,
        Self::M5Large,
        Self::C5Large,
    ];
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when an instance type name is not supported.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unsupported instance type: {0}")]
pub struct UnknownInstanceSize(pub String);

impl FromStr for InstanceSize {
    type Err = UnknownInstanceSize;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|size| size.as_str() == value)
            .ok_or_else(|| UnknownInstanceSize(value.to_owned()))
    }
}
