// Access arbitration and the consumer-facing operation surface
//
// The manager owns the device arena and wires the directory, the coupling
// resolver, and an optional lifecycle hook together. Consumers acquire
// handles here and route every subsequent operation through it; per-device
// serialization happens inside the device records, and the arena lock is
// only ever held to map an id to its record, never across an operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::backend::RegulatorBackend;
use crate::coupling::CouplingResolver;
use crate::device::{DeviceConfig, RegulatorDevice};
use crate::directory::SupplyDirectory;
use crate::error::{Error, Result};
use crate::handle::{DeviceSnapshot, HandleSnapshot, RegulatorHandle};
use crate::types::{AccessMode, ConsumerId, DeviceId, HandleId, PowerState, VoltageRange};

/// Binds a handle's lifetime to its consumer's.
///
/// Contract: `bind` runs once after a handle is successfully attached; a
/// `true` return marks the handle as device-linked. `unbind` runs once
/// after a device-linked handle is detached, through either release form.
/// The core itself never releases a handle on the hook's behalf; whatever
/// lifetime coupling the hook establishes, the hook owns it.
pub trait LifecycleHook: Send + Sync {
    fn bind(&self, consumer: &ConsumerId, handle: HandleId) -> bool;

    fn unbind(&self, consumer: &ConsumerId, handle: HandleId);
}

#[derive(Default)]
struct DeviceArena {
    by_id: HashMap<DeviceId, Arc<RegulatorDevice>>,
    by_name: HashMap<String, DeviceId>,
}

/// The shared entry point consumers acquire and operate handles through.
pub struct RegulatorManager {
    directory: Box<dyn SupplyDirectory>,
    coupling: Box<dyn CouplingResolver>,
    hook: Option<Box<dyn LifecycleHook>>,
    devices: RwLock<DeviceArena>,
    active_state: RwLock<PowerState>,
    next_device: AtomicU64,
    next_handle: AtomicU64,
}

impl RegulatorManager {
    /// Build a manager over the given configuration sources. Pass
    /// [`crate::directory::EmptyDirectory`] / [`crate::coupling::NoCoupling`]
    /// when the respective configuration is absent.
    pub fn new(directory: Box<dyn SupplyDirectory>, coupling: Box<dyn CouplingResolver>) -> Self {
        RegulatorManager {
            directory,
            coupling,
            hook: None,
            devices: RwLock::new(DeviceArena::default()),
            active_state: RwLock::new(PowerState::On),
            next_device: AtomicU64::new(1),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Install a lifecycle hook; see [`LifecycleHook`] for the contract.
    pub fn with_lifecycle_hook(mut self, hook: Box<dyn LifecycleHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Register a physical regulator and its backend driver. Always-on
    /// devices are powered up here; a power-up failure leaves the device
    /// unregistered.
    pub fn register_device(
        &self,
        config: DeviceConfig,
        backend: Box<dyn RegulatorBackend>,
    ) -> Result<DeviceId> {
        let mut arena = self.devices.write().expect("device arena lock poisoned");
        if arena.by_name.contains_key(&config.name) {
            return Err(Error::InvalidArgument(format!(
                "device {} already registered",
                config.name
            )));
        }
        let id = DeviceId(self.next_device.fetch_add(1, Ordering::Relaxed));
        let name = config.name.clone();
        let always_on = config.always_on;
        let device = Arc::new(RegulatorDevice::new(id, config, backend));
        if always_on {
            device.power_up()?;
        }
        arena.by_name.insert(name, id);
        arena.by_id.insert(id, device);
        Ok(id)
    }

    /// The power state voltage constraints are currently applied against.
    pub fn active_power_state(&self) -> PowerState {
        *self.active_state.read().expect("active state lock poisoned")
    }

    /// Acquire a handle on `supply` for `consumer`.
    ///
    /// An empty supply name is rejected; the get-all-supplies form is
    /// [`Self::bulk_get_all`]. An unresolvable supply is fatal for Normal
    /// and Exclusive requests; an Optional request gets a stub handle that
    /// accepts every operation as a successful no-op.
    pub fn get(
        &self,
        consumer: &ConsumerId,
        supply: &str,
        mode: AccessMode,
    ) -> Result<RegulatorHandle> {
        if supply.is_empty() {
            return Err(Error::InvalidArgument(
                "empty supply name; use bulk_get_all to acquire every declared supply".into(),
            ));
        }
        self.acquire(consumer, supply, mode)
    }

    fn acquire(
        &self,
        consumer: &ConsumerId,
        supply: &str,
        mode: AccessMode,
    ) -> Result<RegulatorHandle> {
        let device = match self.directory.resolve(consumer, supply)? {
            Some(name) => {
                let arena = self.devices.read().expect("device arena lock poisoned");
                arena
                    .by_name
                    .get(&name)
                    .and_then(|id| arena.by_id.get(id))
                    .cloned()
            }
            None => None,
        };
        let Some(device) = device else {
            if mode.is_optional() {
                log::debug!("optional supply {supply} for {consumer} did not resolve, handing out a stub");
                return Ok(self.stub_handle(consumer, supply));
            }
            return Err(Error::NotFound(format!("{supply} for {consumer}")));
        };
        let name = device.name();
        if self.coupling.coupled_count(name) > 0 && !self.coupling.is_coupling_valid(name) {
            return Err(Error::CouplingMismatch(format!(
                "{name} declares coupling its partners do not reciprocate"
            )));
        }
        let handle_id = HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        device.attach(handle_id, consumer.clone(), supply.to_owned(), mode)?;
        if let Some(hook) = &self.hook {
            if hook.bind(consumer, handle_id) {
                device.set_device_link(handle_id, true)?;
            }
        }
        Ok(RegulatorHandle {
            id: handle_id,
            device: Some(device.id()),
            consumer: consumer.clone(),
            supply_name: supply.to_owned(),
            mode,
        })
    }

    fn stub_handle(&self, consumer: &ConsumerId, supply: &str) -> RegulatorHandle {
        RegulatorHandle {
            id: HandleId(self.next_handle.fetch_add(1, Ordering::Relaxed)),
            device: None,
            consumer: consumer.clone(),
            supply_name: supply.to_owned(),
            mode: AccessMode::Optional,
        }
    }

    /// Release a handle. Fails `Unbalanced`, leaving the handle attached,
    /// if it still holds enables or a pending deferred disable; use
    /// [`Self::put_forced`] to wind those down on release.
    pub fn put(&self, handle: &RegulatorHandle) -> Result<()> {
        self.release(handle, false)
    }

    /// Release a handle even if its enable state is unbalanced. Each
    /// outstanding contribution is unwound and logged; the rail is never
    /// silently leaked.
    pub fn put_forced(&self, handle: &RegulatorHandle) -> Result<()> {
        self.release(handle, true)
    }

    fn release(&self, handle: &RegulatorHandle, force: bool) -> Result<()> {
        let Some(device) = self.device_for(handle)? else {
            return Ok(());
        };
        let record = device.detach(handle.id, force)?;
        if record.device_link {
            if let Some(hook) = &self.hook {
                hook.unbind(&record.consumer, handle.id);
            }
        }
        Ok(())
    }

    /// Acquire several supplies for one consumer, all-or-nothing. On the
    /// first failure every handle acquired so far is released in reverse
    /// order and the original error is returned; a failure during the
    /// unwind is logged and the unwind continues.
    pub fn bulk_get(
        &self,
        consumer: &ConsumerId,
        requests: &[(&str, AccessMode)],
    ) -> Result<Vec<RegulatorHandle>> {
        let mut acquired: Vec<RegulatorHandle> = Vec::with_capacity(requests.len());
        for (supply, mode) in requests {
            match self.get(consumer, supply, *mode) {
                Ok(handle) => acquired.push(handle),
                Err(err) => {
                    self.rollback(acquired);
                    return Err(err);
                }
            }
        }
        Ok(acquired)
    }

    /// Acquire every supply declared for `consumer`, in declaration order,
    /// with Normal access. The recognized get-all-supplies bulk form; a
    /// consumer with no declared supplies gets an empty set.
    pub fn bulk_get_all(&self, consumer: &ConsumerId) -> Result<Vec<RegulatorHandle>> {
        let supplies = self.directory.declared_for(consumer);
        let requests: Vec<(&str, AccessMode)> = supplies
            .iter()
            .map(|supply| (supply.as_str(), AccessMode::Normal))
            .collect();
        self.bulk_get(consumer, &requests)
    }

    fn rollback(&self, acquired: Vec<RegulatorHandle>) {
        for handle in acquired.into_iter().rev() {
            if let Err(err) = self.put(&handle) {
                log::warn!("bulk rollback of {} failed: {err}", handle.supply_name());
            }
        }
    }

    /// Enable the supply behind `handle`, counting one enable against it.
    pub fn enable(&self, handle: &RegulatorHandle) -> Result<()> {
        match self.device_for(handle)? {
            Some(device) => device.enable(handle.id),
            None => Ok(()),
        }
    }

    /// Surrender one enable immediately.
    pub fn disable(&self, handle: &RegulatorHandle) -> Result<()> {
        match self.device_for(handle)? {
            Some(device) => device.disable(handle.id),
            None => Ok(()),
        }
    }

    /// Surrender one enable but hold the rail for `delay`, coalescing
    /// rapid enable/disable churn. Must be called within a tokio runtime.
    pub fn disable_deferred(&self, handle: &RegulatorHandle, delay: Duration) -> Result<()> {
        match self.device_for(handle)? {
            Some(device) => device.disable_deferred(handle.id, delay),
            None => Ok(()),
        }
    }

    /// Handle-level enable state: true while the handle holds live enables
    /// or a deferred disable that has not fired yet.
    pub fn is_enabled(&self, handle: &RegulatorHandle) -> Result<bool> {
        match self.device_for(handle)? {
            Some(device) => device.is_handle_enabled(handle.id),
            None => Ok(false),
        }
    }

    /// Store the handle's voltage constraint for `state`, applying it
    /// through the backend when `state` is currently active. The stored
    /// table keeps the new value even if the backend rejects it.
    pub fn set_voltage(
        &self,
        handle: &RegulatorHandle,
        state: PowerState,
        min_uv: i32,
        max_uv: i32,
    ) -> Result<()> {
        if min_uv > max_uv {
            return Err(Error::InvalidRange(format!(
                "min {min_uv} above max {max_uv} for {}",
                handle.supply_name()
            )));
        }
        let Some(device) = self.device_for(handle)? else {
            return Ok(());
        };
        device.set_voltage(
            handle.id,
            state,
            VoltageRange::new(min_uv, max_uv),
            self.active_power_state(),
        )
    }

    /// Current output voltage of the supply behind `handle`.
    pub fn get_voltage(&self, handle: &RegulatorHandle) -> Result<i32> {
        match self.device_for(handle)? {
            Some(device) => device.get_voltage(),
            None => Ok(0),
        }
    }

    /// Record the handle's requested load current and refresh the device
    /// aggregate.
    pub fn set_load(&self, handle: &RegulatorHandle, ua: i32) -> Result<()> {
        match self.device_for(handle)? {
            Some(device) => device.set_load(handle.id, ua),
            None => Ok(()),
        }
    }

    /// Record the handle's bypass request.
    pub fn set_bypass(&self, handle: &RegulatorHandle, bypass: bool) -> Result<()> {
        match self.device_for(handle)? {
            Some(device) => device.set_bypass(handle.id, bypass),
            None => Ok(()),
        }
    }

    /// Switch the system to `new_state` and reconcile every device's
    /// stored constraints for it. Devices whose consumers constrain the
    /// state to an empty intersection are reported (first error returned);
    /// the remaining devices are still processed.
    pub fn transition_power_state(&self, new_state: PowerState) -> Result<()> {
        *self.active_state.write().expect("active state lock poisoned") = new_state;
        let devices: Vec<Arc<RegulatorDevice>> = {
            let arena = self.devices.read().expect("device arena lock poisoned");
            arena.by_id.values().cloned().collect()
        };
        let mut first_error = None;
        for device in devices {
            if let Err(err) = device.apply_power_state(new_state) {
                log::warn!("power state {new_state}: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stored voltage constraints of every handle attached to `device` for
    /// `state`, unset entries omitted. For external coordinators running
    /// their own reconciliation.
    pub fn voltage_constraints(
        &self,
        device: DeviceId,
        state: PowerState,
    ) -> Result<Vec<VoltageRange>> {
        Ok(self.device_by_id(device)?.voltage_constraints(state))
    }

    /// Number of coupling partners `device` declares.
    pub fn coupled_count(&self, device: DeviceId) -> Result<usize> {
        let device = self.device_by_id(device)?;
        Ok(self.coupling.coupled_count(device.name()))
    }

    /// The declared partner at `index`; `None` when `index` is out of
    /// range or the partner is not registered yet.
    pub fn coupled_partner(&self, device: DeviceId, index: usize) -> Result<Option<DeviceId>> {
        let device = self.device_by_id(device)?;
        let Some(partner) = self.coupling.coupled_at(device.name(), index) else {
            return Ok(None);
        };
        let arena = self.devices.read().expect("device arena lock poisoned");
        Ok(arena.by_name.get(partner).copied())
    }

    /// Whether the coupling declared for `device` is symmetric.
    pub fn is_coupling_valid(&self, device: DeviceId) -> Result<bool> {
        let device = self.device_by_id(device)?;
        Ok(self.coupling.is_coupling_valid(device.name()))
    }

    /// Diagnostics view of a handle; a stub reports zeros and an unset
    /// constraint table.
    pub fn handle_snapshot(&self, handle: &RegulatorHandle) -> Result<HandleSnapshot> {
        match self.device_for(handle)? {
            Some(device) => device.handle_snapshot(handle.id),
            None => Ok(HandleSnapshot {
                supply_name: handle.supply_name.clone(),
                enable_count: 0,
                deferred_disables: 0,
                load_ua: 0,
                always_on: false,
                bypass: false,
                device_link: false,
                voltage: vec![None; PowerState::COUNT],
            }),
        }
    }

    /// Diagnostics view of a device.
    pub fn device_snapshot(&self, device: DeviceId) -> Result<DeviceSnapshot> {
        Ok(self.device_by_id(device)?.device_snapshot())
    }

    fn device_for(&self, handle: &RegulatorHandle) -> Result<Option<Arc<RegulatorDevice>>> {
        let Some(id) = handle.device else {
            return Ok(None);
        };
        Ok(Some(self.device_by_id(id)?))
    }

    fn device_by_id(&self, id: DeviceId) -> Result<Arc<RegulatorDevice>> {
        self.devices
            .read()
            .expect("device arena lock poisoned")
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("{id} is not registered")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupling::NoCoupling;
    use crate::directory::{DeclaredDirectory, EmptyDirectory, SupplyBinding};
    use crate::test_utils::MockBackend;

    fn manager_with_buck1() -> (RegulatorManager, DeviceId) {
        let directory = DeclaredDirectory::new(
            vec![SupplyBinding {
                consumer: ConsumerId::new("mmc0"),
                supply: "vcc".into(),
                device: "buck1".into(),
            }],
            Vec::new(),
        );
        let manager = RegulatorManager::new(Box::new(directory), Box::new(NoCoupling));
        let id = manager
            .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
            .unwrap();
        (manager, id)
    }

    #[test]
    fn empty_supply_name_is_rejected() {
        let (manager, _) = manager_with_buck1();
        let err = manager
            .get(&ConsumerId::new("mmc0"), "", AccessMode::Normal)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn duplicate_device_name_is_rejected() {
        let (manager, _) = manager_with_buck1();
        let err = manager
            .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn optional_get_without_configuration_yields_stub() {
        let manager = RegulatorManager::new(Box::new(EmptyDirectory), Box::new(NoCoupling));
        let consumer = ConsumerId::new("mmc0");
        let handle = manager
            .get(&consumer, "vcc", AccessMode::Optional)
            .unwrap();
        assert!(handle.is_stub());
        assert!(manager
            .get(&consumer, "vcc", AccessMode::Normal)
            .is_err());
    }

    #[test]
    fn active_state_defaults_to_on() {
        let (manager, _) = manager_with_buck1();
        assert_eq!(manager.active_power_state(), PowerState::On);
        manager.transition_power_state(PowerState::Standby).unwrap();
        assert_eq!(manager.active_power_state(), PowerState::Standby);
    }
}
