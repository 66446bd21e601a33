// Consumer handles and diagnostics snapshots
//
// A handle is the token a consumer gets back from acquisition. Its mutable
// bookkeeping (enable counts, constraint table, flags) lives inside the
// owning device's lock; the handle itself only carries the identifiers
// needed to reach it.

use serde::{Deserialize, Serialize};

use crate::types::{AccessMode, ConsumerId, DeviceId, HandleId, VoltageRange};

/// A consumer's claim on one supply.
///
/// Returned by acquisition and consumed conceptually by release; using a
/// handle after releasing it fails with `InvalidArgument`. A handle for an
/// optional supply that did not resolve is a stub: every operation on it
/// succeeds without touching hardware.
#[derive(Debug)]
pub struct RegulatorHandle {
    pub(crate) id: HandleId,
    pub(crate) device: Option<DeviceId>,
    pub(crate) consumer: ConsumerId,
    pub(crate) supply_name: String,
    pub(crate) mode: AccessMode,
}

impl RegulatorHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// The device this handle is attached to, `None` for a stub.
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    /// The supply name the consumer asked for.
    pub fn supply_name(&self) -> &str {
        &self.supply_name
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// True when this handle stands in for an absent optional supply.
    pub fn is_stub(&self) -> bool {
        self.device.is_none()
    }
}

/// Point-in-time view of one handle, for external diagnostics exporters.
///
/// `voltage` is indexed by [`crate::types::PowerState::index`]; `None`
/// entries are unset constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSnapshot {
    pub supply_name: String,
    pub enable_count: u32,
    pub deferred_disables: u32,
    pub load_ua: i32,
    pub always_on: bool,
    pub bypass: bool,
    pub device_link: bool,
    pub voltage: Vec<Option<VoltageRange>>,
}

/// Point-in-time view of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub open_count: usize,
    pub enable_count: u32,
    pub load_ua: i64,
    pub exclusive: bool,
}
