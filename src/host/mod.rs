//! Host USB subsystem abstraction
//!
//! `UsbHost` models what the OS USB subsystem provides to this crate:
//! device enumeration, permission query/request, descriptor inspection,
//! and opening devices. `HostLink` is one open device connection capable
//! of interface claims and bounded bulk-OUT writes.
//!
//! The production backend is [`rusb::RusbHost`]; tests use the scriptable
//! mock in `test_utils`.

pub mod rusb;

use crate::error::HostError;
use crate::types::{DeviceId, DeviceInfo};
use std::time::Duration;

pub use self::rusb::RusbHost;

/// Asynchronous notification from the host USB subsystem
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Outcome of a previously issued permission request
    PermissionResolved { device: DeviceId, granted: bool },
    /// A device was plugged in
    DeviceAttached { device: DeviceInfo },
    /// A device was unplugged
    DeviceDetached { device: DeviceId },
}

/// One open device connection
///
/// Dropping the link closes the underlying native handle.
pub trait HostLink: Send {
    /// Claim an interface for exclusive use.
    fn claim_interface(&mut self, interface: u8) -> Result<(), HostError>;

    /// Release a previously claimed interface.
    fn release_interface(&mut self, interface: u8) -> Result<(), HostError>;

    /// Submit one bounded bulk-OUT write.
    ///
    /// `Ok(n)` is the byte count the device accepted. A short count is not
    /// an error; bulk writes either complete the buffer or signal an
    /// explicit failure.
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration)
    -> Result<usize, HostError>;
}

/// The host USB subsystem
pub trait UsbHost: Send {
    /// Enumerate currently attached devices.
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, HostError>;

    /// Whether the platform has already granted access to this device.
    fn has_permission(&mut self, device: &DeviceInfo) -> bool;

    /// Ask the platform for access to this device.
    ///
    /// The outcome is delivered later as a [`HostEvent::PermissionResolved`]
    /// on the event stream, never synchronously.
    fn request_permission(&mut self, device: &DeviceInfo) -> Result<(), HostError>;

    /// Address of the first bulk-OUT endpoint on the given interface, if any.
    fn bulk_out_endpoint(
        &mut self,
        device: &DeviceInfo,
        interface: u8,
    ) -> Result<Option<u8>, HostError>;

    /// Open a low-level connection to the device.
    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn HostLink>, HostError>;

    /// Receiver for the host event stream.
    fn events(&self) -> async_channel::Receiver<HostEvent>;

    /// Drive the backend event machinery for at most `timeout`.
    fn pump(&mut self, timeout: Duration) -> Result<(), HostError>;
}
