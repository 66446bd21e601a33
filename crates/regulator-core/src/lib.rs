// Regulator consumer framework
//
// Shared-access management for a finite set of physical voltage/current
// regulators consumed by independent subsystems. Consumers acquire
// per-supply handles through a manager, which arbitrates access modes,
// reference-counts enable/disable (including debounced deferred disable),
// stores per-power-state voltage constraints, and validates
// coupled-regulator declarations. The hardware itself is reached only
// through the backend driver trait.

pub mod backend;
pub mod coupling;
pub mod device;
pub mod directory;
pub mod error;
pub mod handle;
pub mod manager;
pub mod test_utils;
pub mod types;

pub use backend::{BackendResult, RegulatorBackend};
pub use coupling::{CouplingResolver, DeclaredCoupling, NoCoupling};
pub use device::{DeviceConfig, RegulatorDevice};
pub use directory::{
    DeclaredDirectory, EmptyDirectory, SupplyBinding, SupplyDirectory, SupplyMapEntry,
};
pub use error::{BackendError, Error, Result};
pub use handle::{DeviceSnapshot, HandleSnapshot, RegulatorHandle};
pub use manager::{LifecycleHook, RegulatorManager};
pub use types::{AccessMode, ConsumerId, DeviceId, HandleId, PowerState, VoltageRange};
