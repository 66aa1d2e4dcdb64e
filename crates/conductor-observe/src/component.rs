//! Originating component of a log record
//!
//! The set of components is closed. Per-component behavior lives in a
//! static table indexed by the enum, so adding a component means adding
//! one variant and one table row.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Monitor,
    Tier,
    Session,
    Correlation,
    Guard,
    Output,
    Protocol,
    /// The command being run; default for facade calls
    #[default]
    Command,
}

/// Static properties of a component
#[derive(Debug)]
pub struct ComponentInfo {
    /// Tag written to the `component=` field of a record line
    pub tag: &'static str,
    /// Informational lines stay visible under minimal logging
    pub essential: bool,
}

const COMPONENT_TABLE: [ComponentInfo; 8] = [
    ComponentInfo {
        tag: "monitor",
        essential: false,
    },
    ComponentInfo {
        tag: "tier",
        essential: true,
    },
    ComponentInfo {
        tag: "session",
        essential: false,
    },
    ComponentInfo {
        tag: "correlation",
        essential: false,
    },
    ComponentInfo {
        tag: "guard",
        essential: false,
    },
    ComponentInfo {
        tag: "output",
        essential: true,
    },
    ComponentInfo {
        tag: "protocol",
        essential: false,
    },
    ComponentInfo {
        tag: "command",
        essential: true,
    },
];

impl Component {
    pub const ALL: [Component; 8] = [
        Component::Monitor,
        Component::Tier,
        Component::Session,
        Component::Correlation,
        Component::Guard,
        Component::Output,
        Component::Protocol,
        Component::Command,
    ];

    const fn index(self) -> usize {
        match self {
            Component::Monitor => 0,
            Component::Tier => 1,
            Component::Session => 2,
            Component::Correlation => 3,
            Component::Guard => 4,
            Component::Output => 5,
            Component::Protocol => 6,
            Component::Command => 7,
        }
    }

    pub fn info(self) -> &'static ComponentInfo {
        &COMPONENT_TABLE[self.index()]
    }

    pub fn tag(self) -> &'static str {
        self.info().tag
    }

    pub fn is_essential(self) -> bool {
        self.info().essential
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .into_iter()
            .find(|c| c.tag() == s)
            .ok_or_else(|| format!("unknown component: {s}"))
    }
}
