//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Which REST dialect a backend panel speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    /// 3X-UI style panel: inbound-scoped clients, JSON login
    Xui,
    /// Marzban style panel: user-scoped CRUD, OAuth2 form login
    Marzban,
}

impl PanelKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xui => "xui",
            Self::Marzban => "marzban",
        }
    }
}

impl Default for PanelKind {
    fn default() -> Self {
        Self::Xui
    }
}

impl std::fmt::Display for PanelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name of a backend selection policy.
///
/// Parsing never fails hard: callers decide what to do with an unknown
/// name (the fleet manager falls back to least-load).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LeastLoad,
    RoundRobin,
    Random,
    Geographic,
    Priority,
}

impl StrategyKind {
    /// All known strategies, in registration order.
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::LeastLoad,
        StrategyKind::RoundRobin,
        StrategyKind::Random,
        StrategyKind::Geographic,
        StrategyKind::Priority,
    ];

    /// Parse a strategy name such as `least_load` or `round-robin`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "least_load" => Some(Self::LeastLoad),
            "round_robin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "geographic" => Some(Self::Geographic),
            "priority" => Some(Self::Priority),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastLoad => "least_load",
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::Geographic => "geographic",
            Self::Priority => "priority",
        }
    }
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::LeastLoad
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bytes in one GiB. XUI panels report quotas in GB on the wire.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;
