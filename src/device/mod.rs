pub mod handle;
pub mod simulated;

pub use handle::{DeviceGuard, DeviceHandle};
pub use simulated::{SimulatedDevice, SimulatedDeviceBuilder};

use crate::error::DaqError;
use crate::types::{DeviceInfo, RawScan, ScanConfig};

/// Narrow capability interface over a physical acquisition unit
///
/// Implementations talk to real hardware, so the device holds its
/// configuration as mutable state and must never see two calls at once.
/// [`DeviceHandle`] is the only owner of an adapter in a running server
/// and enforces that.
///
/// # Error contract
/// - `configure` fails with `DeviceUnavailable` or `InvalidParameter`
/// - `acquire` fails with `DeviceUnavailable` or `Timeout`, and must return
///   within a bounded time
///
/// Any other error kind is treated as an internal adapter failure.
pub trait DeviceAdapter: Send {
    /// Static description of the unit. Called once when the handle opens.
    fn info(&self) -> DeviceInfo;

    /// Program channel list, scan rate and input ranges
    fn configure(&mut self, config: &ScanConfig) -> Result<(), DaqError>;

    /// Block until `count` scans of every configured channel are captured.
    ///
    /// Returns the channel-interleaved stream, `count * channels` values long.
    fn acquire(&mut self, count: usize) -> Result<RawScan, DaqError>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), DaqError>;
}

impl<T: DeviceAdapter + ?Sized> DeviceAdapter for Box<T> {
    fn info(&self) -> DeviceInfo {
        (**self).info()
    }

    fn configure(&mut self, config: &ScanConfig) -> Result<(), DaqError> {
        (**self).configure(config)
    }

    fn acquire(&mut self, count: usize) -> Result<RawScan, DaqError> {
        (**self).acquire(count)
    }

    fn close(&mut self) -> Result<(), DaqError> {
        (**self).close()
    }
}
