// Regulator device records and the enable/disable state machine
//
// One record exists per physical rail. A single mutex guards the attached
// consumer list, the aggregate counters, and the backend driver; every
// mutating operation holds it for its full duration, backend call included,
// so a device never has two operations in flight. The backend may block
// while the lock is held; that is the accepted cost of strict
// serialization.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::RegulatorBackend;
use crate::error::{Error, Result};
use crate::handle::{DeviceSnapshot, HandleSnapshot};
use crate::types::{AccessMode, ConsumerId, DeviceId, HandleId, PowerState, VoltageRange};

/// Static configuration supplied when a device is registered.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub always_on: bool,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        DeviceConfig {
            name: name.into(),
            always_on: false,
        }
    }

    /// Keep the rail physically powered regardless of consumer activity.
    /// The device is enabled at registration and the backend `disable` is
    /// never issued for it.
    pub fn always_on(mut self, always_on: bool) -> Self {
        self.always_on = always_on;
        self
    }
}

/// Mutable bookkeeping for one attached consumer, guarded by the device
/// lock.
pub(crate) struct Attached {
    pub(crate) handle: HandleId,
    pub(crate) consumer: ConsumerId,
    pub(crate) supply_name: String,
    pub(crate) mode: AccessMode,
    pub(crate) enable_count: u32,
    pub(crate) deferred_disables: u32,
    pub(crate) load_ua: i32,
    pub(crate) always_on: bool,
    pub(crate) bypass: bool,
    pub(crate) device_link: bool,
    pub(crate) voltage: [Option<VoltageRange>; PowerState::COUNT],
}

impl Attached {
    fn new(
        handle: HandleId,
        consumer: ConsumerId,
        supply_name: String,
        mode: AccessMode,
        always_on: bool,
    ) -> Self {
        Attached {
            handle,
            consumer,
            supply_name,
            mode,
            enable_count: 0,
            deferred_disables: 0,
            load_ua: 0,
            always_on,
            bypass: false,
            device_link: false,
            voltage: [None; PowerState::COUNT],
        }
    }

    /// Whether this handle currently contributes one aggregate enable,
    /// either through live enables or a not-yet-fired deferred disable.
    fn holds_rail(&self) -> bool {
        self.enable_count > 0 || self.deferred_disables > 0
    }

    fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            supply_name: self.supply_name.clone(),
            enable_count: self.enable_count,
            deferred_disables: self.deferred_disables,
            load_ua: self.load_ua,
            always_on: self.always_on,
            bypass: self.bypass,
            device_link: self.device_link,
            voltage: self.voltage.to_vec(),
        }
    }
}

struct DeviceState {
    attached: Vec<Attached>,
    enable_count: u32,
    load_ua: i64,
    backend: Box<dyn RegulatorBackend>,
}

impl DeviceState {
    fn index_of(&self, handle: HandleId) -> Result<usize> {
        self.attached
            .iter()
            .position(|a| a.handle == handle)
            .ok_or_else(|| Error::InvalidArgument(format!("{handle} is not attached")))
    }

    fn has_exclusive(&self) -> bool {
        self.attached.iter().any(|a| a.mode.is_exclusive())
    }

    /// One more handle holds the rail; power it on the 0 -> 1 transition.
    fn aggregate_enable(&mut self, always_on: bool) -> Result<()> {
        if self.enable_count == 0 && !always_on {
            self.backend.enable().map_err(Error::BackendFailure)?;
        }
        self.enable_count += 1;
        Ok(())
    }

    /// One fewer handle holds the rail; power it off on the 1 -> 0
    /// transition unless the device is always-on.
    fn aggregate_disable(&mut self, always_on: bool) -> Result<()> {
        if self.enable_count == 0 {
            return Err(Error::Unbalanced(
                "device enable count would go negative".into(),
            ));
        }
        if self.enable_count == 1 && !always_on {
            self.backend.disable().map_err(Error::BackendFailure)?;
        }
        self.enable_count -= 1;
        Ok(())
    }
}

/// One physical regulator, shared by all handles attached to it.
pub struct RegulatorDevice {
    id: DeviceId,
    name: String,
    always_on: bool,
    state: Mutex<DeviceState>,
}

impl RegulatorDevice {
    pub(crate) fn new(
        id: DeviceId,
        config: DeviceConfig,
        backend: Box<dyn RegulatorBackend>,
    ) -> Self {
        RegulatorDevice {
            id,
            name: config.name,
            always_on: config.always_on,
            state: Mutex::new(DeviceState {
                attached: Vec::new(),
                enable_count: 0,
                load_ua: 0,
                backend,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_always_on(&self) -> bool {
        self.always_on
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("regulator device lock poisoned")
    }

    /// Registration-time power-up for always-on devices.
    pub(crate) fn power_up(&self) -> Result<()> {
        let mut st = self.lock_state();
        st.backend.enable().map_err(Error::BackendFailure)
    }

    /// Attach a new consumer record, enforcing access-mode arbitration.
    pub(crate) fn attach(
        &self,
        handle: HandleId,
        consumer: ConsumerId,
        supply_name: String,
        mode: AccessMode,
    ) -> Result<()> {
        let mut st = self.lock_state();
        if mode.is_exclusive() && !st.attached.is_empty() {
            return Err(Error::Busy(format!(
                "{} has {} attached consumer(s), exclusive access refused",
                self.name,
                st.attached.len()
            )));
        }
        if st.has_exclusive() {
            return Err(Error::Busy(format!(
                "{} is held exclusively",
                self.name
            )));
        }
        let mut record = Attached::new(handle, consumer, supply_name, mode, self.always_on);
        if mode.is_exclusive() {
            // The sole owner inherits an already-powered rail so it can
            // balance an enable it never issued.
            match st.backend.is_enabled() {
                Ok(true) => {
                    record.enable_count = 1;
                    st.enable_count = 1;
                }
                Ok(false) => {}
                Err(err) => {
                    log::debug!("{}: enable state unreadable on exclusive attach: {err}", self.name);
                }
            }
        }
        st.attached.push(record);
        Ok(())
    }

    pub(crate) fn set_device_link(&self, handle: HandleId, linked: bool) -> Result<()> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        st.attached[idx].device_link = linked;
        Ok(())
    }

    /// Detach a consumer record.
    ///
    /// Refuses with `Unbalanced` while the handle still holds enables or a
    /// pending deferred disable, unless `force` is set; the forced form
    /// winds the handle's aggregate contribution down first so the rail is
    /// never leaked silently.
    pub(crate) fn detach(&self, handle: HandleId, force: bool) -> Result<Attached> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        let outstanding = st.attached[idx].enable_count;
        let pending = st.attached[idx].deferred_disables;
        if outstanding > 0 || pending > 0 {
            if !force {
                return Err(Error::Unbalanced(format!(
                    "release of {} with {outstanding} outstanding enable(s) and {pending} pending deferred disable(s)",
                    st.attached[idx].supply_name
                )));
            }
            log::warn!(
                "{}: forcing release of {} with {outstanding} outstanding enable(s) and {pending} pending deferred disable(s)",
                self.name,
                st.attached[idx].supply_name
            );
            if let Err(err) = st.aggregate_disable(self.always_on) {
                log::warn!("{}: forced disable failed: {err}", self.name);
            }
        }
        let record = st.attached.remove(idx);
        st.load_ua -= i64::from(record.load_ua);
        Ok(record)
    }

    /// Consumer enable. Cancels one pending deferred disable if there is
    /// one; otherwise counts up and propagates the handle's 0 -> 1
    /// transition to the aggregate.
    pub(crate) fn enable(&self, handle: HandleId) -> Result<()> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        if st.attached[idx].deferred_disables > 0 {
            // The rail never went down; this enable and the pending
            // disable annihilate. The scheduled task finds nothing to do.
            st.attached[idx].deferred_disables -= 1;
            st.attached[idx].enable_count += 1;
            return Ok(());
        }
        if st.attached[idx].enable_count == 0 {
            st.aggregate_enable(self.always_on)?;
        }
        st.attached[idx].enable_count += 1;
        Ok(())
    }

    /// Consumer disable, immediate form.
    pub(crate) fn disable(&self, handle: HandleId) -> Result<()> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        if st.attached[idx].enable_count == 0 {
            return Err(Error::Unbalanced(format!(
                "disable of {} without matching enable",
                st.attached[idx].supply_name
            )));
        }
        if st.attached[idx].enable_count == 1 {
            st.aggregate_disable(self.always_on)?;
        }
        st.attached[idx].enable_count -= 1;
        Ok(())
    }

    /// Consumer disable, deferred form: the handle's last enable is
    /// surrendered now but the rail is held for `delay` so that rapid
    /// enable/disable churn coalesces. A subsequent enable cancels the
    /// pending disable; cancellation and firing both run their
    /// check-and-decrement under the device lock, so exactly one of them
    /// acts for a given cycle.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn disable_deferred(self: Arc<Self>, handle: HandleId, delay: Duration) -> Result<()> {
        let schedule = {
            let mut st = self.lock_state();
            let idx = st.index_of(handle)?;
            if st.attached[idx].enable_count == 0 {
                return Err(Error::Unbalanced(format!(
                    "deferred disable of {} without matching enable",
                    st.attached[idx].supply_name
                )));
            }
            st.attached[idx].enable_count -= 1;
            if st.attached[idx].enable_count == 0 {
                st.attached[idx].deferred_disables += 1;
                true
            } else {
                false
            }
        };
        if schedule {
            let device = self;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = device.fire_deferred(handle) {
                    log::warn!("{}: deferred disable failed: {err}", device.name);
                }
            });
        }
        Ok(())
    }

    /// Delayed-task body for a deferred disable. A handle released in the
    /// meantime, or a disable cancelled by a fresh enable, makes this a
    /// no-op.
    fn fire_deferred(&self, handle: HandleId) -> Result<()> {
        let mut st = self.lock_state();
        let Ok(idx) = st.index_of(handle) else {
            return Ok(());
        };
        if st.attached[idx].deferred_disables == 0 {
            return Ok(());
        }
        st.attached[idx].deferred_disables -= 1;
        if !st.attached[idx].holds_rail() {
            st.aggregate_disable(self.always_on)?;
        }
        Ok(())
    }

    /// Store a voltage constraint and apply it if `state` is the active
    /// power state. The stored table keeps the new value even when the
    /// backend rejects the application; the stored intent is authoritative
    /// and a later reapply retries it.
    pub(crate) fn set_voltage(
        &self,
        handle: HandleId,
        state: PowerState,
        range: VoltageRange,
        active: PowerState,
    ) -> Result<()> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        st.attached[idx].voltage[state.index()] = Some(range);
        if state == active {
            st.backend
                .set_voltage(range.min_uv, range.max_uv)
                .map_err(Error::BackendFailure)?;
        }
        Ok(())
    }

    /// Reconcile all attached handles' constraints for `state` and apply
    /// the envelope. Handles with no constraint for the state do not
    /// constrain; a device with no constrained handle is left untouched.
    pub(crate) fn apply_power_state(&self, state: PowerState) -> Result<()> {
        let mut st = self.lock_state();
        let mut envelope: Option<VoltageRange> = None;
        for a in &st.attached {
            if let Some(range) = a.voltage[state.index()] {
                envelope = Some(match envelope {
                    None => range,
                    Some(current) => VoltageRange::new(
                        current.min_uv.max(range.min_uv),
                        current.max_uv.min(range.max_uv),
                    ),
                });
            }
        }
        let Some(range) = envelope else {
            return Ok(());
        };
        if range.min_uv > range.max_uv {
            return Err(Error::InvalidRange(format!(
                "{}: consumer constraints for state {state} admit no common voltage",
                self.name
            )));
        }
        st.backend
            .set_voltage(range.min_uv, range.max_uv)
            .map_err(Error::BackendFailure)
    }

    /// Stored constraints of all attached handles for `state`, for an
    /// external coordinator running its own reconciliation.
    pub(crate) fn voltage_constraints(&self, state: PowerState) -> Vec<VoltageRange> {
        let st = self.lock_state();
        st.attached
            .iter()
            .filter_map(|a| a.voltage[state.index()])
            .collect()
    }

    pub(crate) fn set_load(&self, handle: HandleId, ua: i32) -> Result<()> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        let previous = st.attached[idx].load_ua;
        st.attached[idx].load_ua = ua;
        st.load_ua += i64::from(ua) - i64::from(previous);
        Ok(())
    }

    pub(crate) fn set_bypass(&self, handle: HandleId, bypass: bool) -> Result<()> {
        let mut st = self.lock_state();
        let idx = st.index_of(handle)?;
        st.attached[idx].bypass = bypass;
        Ok(())
    }

    pub(crate) fn is_handle_enabled(&self, handle: HandleId) -> Result<bool> {
        let st = self.lock_state();
        let idx = st.index_of(handle)?;
        Ok(st.attached[idx].holds_rail())
    }

    pub(crate) fn get_voltage(&self) -> Result<i32> {
        let st = self.lock_state();
        st.backend.get_voltage().map_err(Error::BackendFailure)
    }

    pub(crate) fn handle_snapshot(&self, handle: HandleId) -> Result<HandleSnapshot> {
        let st = self.lock_state();
        let idx = st.index_of(handle)?;
        Ok(st.attached[idx].snapshot())
    }

    pub(crate) fn device_snapshot(&self) -> DeviceSnapshot {
        let st = self.lock_state();
        DeviceSnapshot {
            name: self.name.clone(),
            open_count: st.attached.len(),
            enable_count: st.enable_count,
            load_ua: st.load_ua,
            exclusive: st.has_exclusive(),
        }
    }
}
