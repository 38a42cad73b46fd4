//! Firewall rule value type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One firewall permission: an address specifier plus an inclusive port
/// range. A single port is represented by equal start and end.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// CIDR (or equivalent) the rule applies to.
    pub source: String,
    /// First port of the range.
    pub port_range_start: u16,
    /// Last port of the range.
    pub port_range_end: u16,
}

impl Rule {
    /// Creates a rule covering `start..=end`.
    #[must_use]
    pub fn range(source: impl Into<String>, start: u16, end: u16) -> Self {
        Self {
            source: source.into(),
            port_range_start: start,
            port_range_end: end,
        }
    }

    /// Creates a rule covering a single port.
    #[must_use]
    pub fn single_port(source: impl Into<String>, port: u16) -> Self {
        Self::range(source, port, port)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port_range_start == self.port_range_end {
            write!(formatter, "{}:{}", self.source, self.port_range_start)
        } else {
            write!(
                formatter,
                "{}:{}-{}",
                self.source, self.port_range_start, self.port_range_end
            )
        }
    }
}

/// Direction a rule applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RuleDirection {
    /// Inbound traffic.
    Inbound,
    /// Outbound traffic.
    Outbound,
}

impl fmt::Display for RuleDirection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        })
    }
}
