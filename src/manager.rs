//! Connection manager
//!
//! Owns the single active device selection, its permission status, and the
//! open transport link. All transitions happen on the worker thread, one
//! command at a time, so no two operations can interleave.
//!
//! Only interface 0 is inspected for a bulk-OUT endpoint by default; a
//! device exposing its bulk endpoint on another interface is unsupported.

use crate::error::{HostError, OpenError, SelectError};
use crate::host::{HostEvent, HostLink, UsbHost};
use crate::types::{DeviceId, DeviceInfo, PermissionState, SelectStatus};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The open transport handle: link plus the claimed interface and the
/// bulk-OUT endpoint selected for writing
///
/// At most one live instance exists process-wide, owned by the manager.
pub struct OpenLink {
    link: Box<dyn HostLink>,
    interface: u8,
    endpoint: u8,
}

impl OpenLink {
    pub fn new(link: Box<dyn HostLink>, interface: u8, endpoint: u8) -> Self {
        Self {
            link,
            interface,
            endpoint,
        }
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    /// One bounded bulk write on the selected endpoint.
    pub fn write_bulk(&mut self, data: &[u8], timeout: Duration) -> Result<usize, HostError> {
        self.link.write_bulk(self.endpoint, data, timeout)
    }

    fn release(mut self) {
        if let Err(e) = self.link.release_interface(self.interface) {
            warn!("failed to release interface {}: {}", self.interface, e);
        }
    }
}

enum LinkState {
    NoDevice,
    Selected {
        device: DeviceInfo,
        permission: PermissionState,
    },
    Open {
        device: DeviceInfo,
        link: OpenLink,
    },
}

/// Device selection and connection state machine
pub struct ConnectionManager {
    host: Box<dyn UsbHost>,
    state: LinkState,
    /// Interface index inspected for a bulk-OUT endpoint; 0 by default
    interface: u8,
}

impl ConnectionManager {
    pub fn new(host: Box<dyn UsbHost>) -> Self {
        Self::with_interface(host, 0)
    }

    pub fn with_interface(host: Box<dyn UsbHost>, interface: u8) -> Self {
        Self {
            host,
            state: LinkState::NoDevice,
            interface,
        }
    }

    /// Receiver for the host event stream (permission results, hot-plug).
    pub fn host_events(&self) -> async_channel::Receiver<HostEvent> {
        self.host.events()
    }

    /// Drive the host backend event machinery.
    pub fn pump_host(&mut self, timeout: Duration) {
        if let Err(e) = self.host.pump(timeout) {
            warn!("host event pump failed: {}", e);
        }
    }

    /// Enumerate currently attached devices.
    pub fn list_devices(&mut self) -> Result<Vec<DeviceInfo>, HostError> {
        self.host.enumerate()
    }

    /// Currently selected device, whether or not a link is open.
    pub fn selected_device(&self) -> Option<&DeviceInfo> {
        match &self.state {
            LinkState::NoDevice => None,
            LinkState::Selected { device, .. } | LinkState::Open { device, .. } => Some(device),
        }
    }

    /// Permission status of the current selection.
    pub fn permission_state(&self) -> PermissionState {
        match &self.state {
            LinkState::NoDevice => PermissionState::Unknown,
            LinkState::Selected { permission, .. } => *permission,
            LinkState::Open { .. } => PermissionState::Granted,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open { .. })
    }

    /// Target a device by vendor/product identifier pair.
    ///
    /// Returns optimistically: `PermissionPending` means the request was
    /// issued and the outcome arrives later via the event stream. An
    /// identity absent from the current enumeration is a hard failure that
    /// leaves any previous selection untouched.
    pub fn select_device(
        &mut self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<SelectStatus, SelectError> {
        // Idempotent reselect: an already open, authorized, or pending
        // selection of the same identity is preserved as-is.
        match &self.state {
            LinkState::Open { device, .. } if device.matches(vendor_id, product_id) => {
                debug!("device already selected and open");
                return Ok(SelectStatus::Ready);
            }
            LinkState::Selected { device, permission } if device.matches(vendor_id, product_id) => {
                match permission {
                    PermissionState::Granted => {
                        debug!("device already selected and authorized");
                        return Ok(SelectStatus::Ready);
                    }
                    PermissionState::Requested => {
                        debug!("device already selected, permission still pending");
                        return Ok(SelectStatus::PermissionPending);
                    }
                    // Denied or Unknown: fall through to a full reselect
                    // with a fresh permission request.
                    _ => {}
                }
            }
            _ => {}
        }

        // Resolve against the registry before touching the current state,
        // so a failed lookup leaves the previous selection intact.
        let devices = self.host.enumerate().map_err(SelectError::Registry)?;
        if devices.is_empty() {
            warn!("no USB devices found");
            return Err(SelectError::NoDevices);
        }

        let Some(device) = devices
            .into_iter()
            .find(|d| d.matches(vendor_id, product_id))
        else {
            warn!(
                "device {:04x}:{:04x} not found among enumerated devices",
                vendor_id, product_id
            );
            return Err(SelectError::NotFound {
                vendor_id,
                product_id,
            });
        };

        info!(
            "selected device {:04x}:{:04x} ({:?})",
            device.vendor_id, device.product_id, device.product
        );
        self.close();

        if self.host.has_permission(&device) {
            debug!("platform permission already granted");
            self.state = LinkState::Selected {
                device,
                permission: PermissionState::Granted,
            };
            Ok(SelectStatus::Ready)
        } else {
            info!("requesting device permission");
            self.host
                .request_permission(&device)
                .map_err(SelectError::PermissionRequest)?;
            self.state = LinkState::Selected {
                device,
                permission: PermissionState::Requested,
            };
            Ok(SelectStatus::PermissionPending)
        }
    }

    /// Apply a permission outcome from the host event stream.
    pub fn on_permission_result(&mut self, device: DeviceId, granted: bool) {
        let LinkState::Selected {
            device: selected,
            permission,
        } = &mut self.state
        else {
            debug!("permission result with no pending selection, ignoring");
            return;
        };
        if selected.id != device {
            debug!("permission result for a different device, ignoring");
            return;
        }

        if granted {
            info!(
                "permission granted for {:04x}:{:04x}",
                selected.vendor_id, selected.product_id
            );
            *permission = PermissionState::Granted;
        } else {
            warn!(
                "permission denied for {:04x}:{:04x}",
                selected.vendor_id, selected.product_id
            );
            *permission = PermissionState::Denied;
        }
    }

    /// Return the open link, opening it lazily from an authorized selection.
    ///
    /// Finds the first bulk-OUT endpoint on the configured interface, opens
    /// the device, and claims the interface exclusively. A claim failure
    /// closes the freshly opened connection before the error returns, so no
    /// native handle dangles.
    pub fn ensure_open(&mut self) -> Result<&mut OpenLink, OpenError> {
        match &self.state {
            LinkState::Open { .. } => {}
            LinkState::NoDevice => return Err(OpenError::NoSelection),
            LinkState::Selected { permission, .. }
                if *permission != PermissionState::Granted =>
            {
                return Err(OpenError::NotAuthorized(*permission));
            }
            LinkState::Selected { device, .. } => {
                let device = device.clone();

                let endpoint = self
                    .host
                    .bulk_out_endpoint(&device, self.interface)
                    .map_err(OpenError::OpenFailed)?
                    .ok_or(OpenError::NoSuchEndpoint {
                        interface: self.interface,
                    })?;

                let mut link = self.host.open(&device).map_err(|e| {
                    warn!("failed to open device: {}", e);
                    OpenError::OpenFailed(e)
                })?;

                if let Err(e) = link.claim_interface(self.interface) {
                    warn!("failed to claim interface {}: {}", self.interface, e);
                    drop(link);
                    return Err(OpenError::ClaimFailed(e));
                }

                info!(
                    "connection open on interface {} endpoint {:#04x}",
                    self.interface, endpoint
                );
                self.state = LinkState::Open {
                    device,
                    link: OpenLink::new(link, self.interface, endpoint),
                };
            }
        }

        match &mut self.state {
            LinkState::Open { link, .. } => Ok(link),
            _ => Err(OpenError::NoSelection),
        }
    }

    /// Release the interface and close the transport if open.
    ///
    /// Safe in any state. The selection and its granted permission are
    /// retained so a later `ensure_open` can reconnect.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        let LinkState::Open { device, link } =
            std::mem::replace(&mut self.state, LinkState::NoDevice)
        else {
            return;
        };

        link.release();
        info!("connection closed");
        self.state = LinkState::Selected {
            device,
            permission: PermissionState::Granted,
        };
    }

    /// React to the selected device disappearing: force-close and drop the
    /// permission back to unknown.
    pub fn on_device_detached(&mut self, device: DeviceId) {
        let matches = match &self.state {
            LinkState::NoDevice => false,
            LinkState::Selected { device: d, .. } | LinkState::Open { device: d, .. } => {
                d.id == device
            }
        };
        if !matches {
            debug!("unrelated device detached, ignoring");
            return;
        }

        warn!("selected device detached, closing connection");
        self.close();
        if let LinkState::Selected { permission, .. } = &mut self.state {
            *permission = PermissionState::Unknown;
        }
    }

    /// React to a device appearing: if it matches a selection whose
    /// permission is pending (or was invalidated by an unplug), re-issue the
    /// permission request under the device's fresh registry identity.
    pub fn on_device_attached(&mut self, device: &DeviceInfo) {
        let LinkState::Selected {
            device: selected,
            permission,
        } = &mut self.state
        else {
            return;
        };
        if !selected.matches(device.vendor_id, device.product_id)
            || !matches!(
                permission,
                PermissionState::Requested | PermissionState::Unknown
            )
        {
            return;
        }

        info!(
            "selected device {:04x}:{:04x} re-attached, re-requesting permission",
            device.vendor_id, device.product_id
        );
        *selected = device.clone();
        *permission = PermissionState::Requested;
        if let Err(e) = self.host.request_permission(device) {
            warn!("failed to re-request permission: {}", e);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
