// Identifier and shared value types for the regulator framework
//
// Device records live in an arena keyed by `DeviceId`; consumer handles carry
// the id rather than a reference so that handle and device lifetimes stay
// independent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a registered regulator device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub(crate) u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rdev-{}", self.0)
    }
}

/// Identifier of one attached consumer handle.
///
/// Unique for the lifetime of the manager that issued it, including across
/// release and re-acquisition of the same supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub(crate) u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// Identity of a consumer subsystem requesting supplies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(name: impl Into<String>) -> Self {
        ConsumerId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(name: &str) -> Self {
        ConsumerId::new(name)
    }
}

/// How a consumer wants to share the regulator with other consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Shared access; any number of consumers may hold the regulator.
    Normal,

    /// Sole access; no other consumer may be attached while this one is.
    Exclusive,

    /// Shared access, but an unresolvable supply yields a no-op stub
    /// instead of an error.
    Optional,
}

impl AccessMode {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive)
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Exclusive => write!(f, "exclusive"),
            Self::Optional => write!(f, "optional"),
        }
    }
}

/// System-wide operating states, each with its own voltage constraint slot
/// per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    /// Fully running.
    On,

    /// Shallow idle.
    Idle,

    /// Standby.
    Standby,

    /// Suspend-to-memory.
    Suspend,
}

impl PowerState {
    /// Number of power states; sizes the per-handle constraint table.
    pub const COUNT: usize = 4;

    /// All states in table order.
    pub const ALL: [PowerState; Self::COUNT] = [
        PowerState::On,
        PowerState::Idle,
        PowerState::Standby,
        PowerState::Suspend,
    ];

    /// Index of this state into a constraint table.
    pub fn index(self) -> usize {
        match self {
            PowerState::On => 0,
            PowerState::Idle => 1,
            PowerState::Standby => 2,
            PowerState::Suspend => 3,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Idle => write!(f, "idle"),
            Self::Standby => write!(f, "standby"),
            Self::Suspend => write!(f, "suspend"),
        }
    }
}

/// A voltage constraint in microvolts, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoltageRange {
    pub min_uv: i32,
    pub max_uv: i32,
}

impl VoltageRange {
    pub fn new(min_uv: i32, max_uv: i32) -> Self {
        VoltageRange { min_uv, max_uv }
    }
}

impl fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] uV", self.min_uv, self.max_uv)
    }
}
