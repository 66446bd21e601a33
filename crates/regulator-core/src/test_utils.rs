// Test helpers
//
// A recording backend for exercising the core without hardware. Failure
// injection is per operation so tests can probe rollback paths.

use std::sync::{Arc, Mutex};

use crate::backend::{BackendResult, RegulatorBackend};
use crate::error::BackendError;

/// A mutating call the backend received, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCall {
    Enable,
    Disable,
    SetVoltage(i32, i32),
}

#[derive(Default)]
struct MockState {
    calls: Vec<BackendCall>,
    enabled: bool,
    voltage: Option<(i32, i32)>,
    fail_enable: bool,
    fail_disable: bool,
    fail_set_voltage: bool,
}

/// Recording backend driver. Clones share state, so a test can hand one
/// clone to the core and keep another as a probe.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutating calls received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Overwrite the simulated rail state, e.g. to model a rail left on
    /// by the boot firmware.
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().enabled = enabled;
    }

    pub fn is_rail_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    /// Last applied voltage constraint, if any.
    pub fn applied_voltage(&self) -> Option<(i32, i32)> {
        self.state.lock().unwrap().voltage
    }

    pub fn fail_enable(&self, fail: bool) {
        self.state.lock().unwrap().fail_enable = fail;
    }

    pub fn fail_disable(&self, fail: bool) {
        self.state.lock().unwrap().fail_disable = fail;
    }

    pub fn fail_set_voltage(&self, fail: bool) {
        self.state.lock().unwrap().fail_set_voltage = fail;
    }
}

impl RegulatorBackend for MockBackend {
    fn enable(&mut self) -> BackendResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_enable {
            return Err(BackendError::new("injected enable failure"));
        }
        st.calls.push(BackendCall::Enable);
        st.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> BackendResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_disable {
            return Err(BackendError::new("injected disable failure"));
        }
        st.calls.push(BackendCall::Disable);
        st.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> BackendResult<bool> {
        Ok(self.state.lock().unwrap().enabled)
    }

    fn set_voltage(&mut self, min_uv: i32, max_uv: i32) -> BackendResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_set_voltage {
            return Err(BackendError::new("injected set_voltage failure"));
        }
        st.calls.push(BackendCall::SetVoltage(min_uv, max_uv));
        st.voltage = Some((min_uv, max_uv));
        Ok(())
    }

    fn get_voltage(&self) -> BackendResult<i32> {
        let st = self.state.lock().unwrap();
        match st.voltage {
            Some((min_uv, _)) => Ok(min_uv),
            None => Ok(0),
        }
    }
}
