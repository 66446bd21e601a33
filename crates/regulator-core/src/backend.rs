// Backend driver interface
//
// The backend is the external driver that actually toggles a rail or steps
// a voltage. The core invokes it only while the owning device's lock is
// held, so implementations may block (powering a rail can be slow) and
// never see two operations in flight for the same device.

use crate::error::BackendError;

/// Result type for backend driver operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Hardware driver for one physical regulator.
///
/// Return values and errors are propagated to the consumer unchanged; the
/// core adds no retries and no interpretation.
pub trait RegulatorBackend: Send {
    /// Power the rail on.
    fn enable(&mut self) -> BackendResult<()>;

    /// Power the rail off.
    fn disable(&mut self) -> BackendResult<()>;

    /// Report whether the rail is currently powered.
    fn is_enabled(&self) -> BackendResult<bool>;

    /// Constrain the output to `[min_uv, max_uv]` microvolts.
    fn set_voltage(&mut self, min_uv: i32, max_uv: i32) -> BackendResult<()>;

    /// Current output voltage in microvolts.
    fn get_voltage(&self) -> BackendResult<i32>;
}
