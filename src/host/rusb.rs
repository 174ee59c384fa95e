//! rusb (libusb) backed host implementation
//!
//! Desktop platforms have no deferred permission dialog: access to a device
//! is decided by whether it can be opened. Permission requests therefore
//! resolve immediately, but the outcome still travels through the host
//! event stream so callers see the same asynchronous shape as on platforms
//! with a real grant dialog.

use crate::error::HostError;
use crate::host::{HostEvent, HostLink, UsbHost};
use crate::types::{DeviceId, DeviceInfo};
use async_channel::{Receiver, Sender, bounded};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Capacity of the host event queue
const EVENT_QUEUE_CAPACITY: usize = 64;

/// rusb-backed USB host
///
/// Keeps a registry of enumerated devices keyed by their registry id.
/// Identifiers are assigned per (bus, address) pair and shared with the
/// hot-plug callback so both sides agree on identity.
pub struct RusbHost {
    context: Context,
    /// (bus, address) -> DeviceId, shared with the hot-plug callback
    ids: Arc<std::sync::Mutex<HashMap<(u8, u8), DeviceId>>>,
    next_id: Arc<AtomicU32>,
    /// Devices seen by the last enumeration
    devices: HashMap<DeviceId, Device<Context>>,
    event_tx: Sender<HostEvent>,
    event_rx: Receiver<HostEvent>,
    _hotplug: Option<Registration<Context>>,
}

impl RusbHost {
    /// Create a new host and register hot-plug callbacks.
    ///
    /// Hot-plug registration failure is not fatal; attach/detach events are
    /// simply unavailable on such platforms.
    pub fn new() -> Result<Self, HostError> {
        let context = Context::new()?;
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let ids = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let next_id = Arc::new(AtomicU32::new(1));

        let monitor = HotplugMonitor {
            event_tx: event_tx.clone(),
            ids: Arc::clone(&ids),
            next_id: Arc::clone(&next_id),
        };

        let hotplug = match HotplugBuilder::new()
            .enumerate(false)
            .register(&context, Box::new(monitor))
        {
            Ok(registration) => {
                debug!("hot-plug callbacks registered");
                Some(registration)
            }
            Err(e) => {
                warn!("hot-plug not available: {}", e);
                None
            }
        };

        Ok(Self {
            context,
            ids,
            next_id,
            devices: HashMap::new(),
            event_tx,
            event_rx,
            _hotplug: hotplug,
        })
    }

    fn device(&self, id: DeviceId) -> Result<&Device<Context>, HostError> {
        self.devices.get(&id).ok_or(HostError::NotFound)
    }

    /// Read the optional string descriptors via a temporary open.
    fn read_strings(device: &Device<Context>) -> (Option<String>, Option<String>) {
        let Ok(descriptor) = device.device_descriptor() else {
            return (None, None);
        };
        let Ok(handle) = device.open() else {
            return (None, None);
        };

        let manufacturer = descriptor
            .manufacturer_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        let product = descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

        (manufacturer, product)
    }
}

impl UsbHost for RusbHost {
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, HostError> {
        let list = self.context.devices()?;
        let mut infos = Vec::new();
        self.devices.clear();

        for device in list.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    warn!("skipping device without readable descriptor: {}", e);
                    continue;
                }
            };

            let key = (device.bus_number(), device.address());
            let id = assign_id(&self.ids, &self.next_id, key);
            let (manufacturer, product) = Self::read_strings(&device);

            infos.push(DeviceInfo {
                id,
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                device_name: Some(format!("Bus {:03} Device {:03}", key.0, key.1)),
                manufacturer,
                product,
            });
            self.devices.insert(id, device);
        }

        debug!("enumerated {} devices", infos.len());
        Ok(infos)
    }

    fn has_permission(&mut self, device: &DeviceInfo) -> bool {
        self.devices
            .get(&device.id)
            .map(|d| d.open().is_ok())
            .unwrap_or(false)
    }

    fn request_permission(&mut self, device: &DeviceInfo) -> Result<(), HostError> {
        let granted = self.has_permission(device);
        let event = HostEvent::PermissionResolved {
            device: device.id,
            granted,
        };
        if self.event_tx.try_send(event).is_err() {
            warn!("host event queue full, dropping permission result");
        }
        Ok(())
    }

    fn bulk_out_endpoint(
        &mut self,
        device: &DeviceInfo,
        interface: u8,
    ) -> Result<Option<u8>, HostError> {
        let device = self.device(device.id)?;
        let config = device.active_config_descriptor()?;

        for iface in config.interfaces() {
            if iface.number() != interface {
                continue;
            }
            for descriptor in iface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() == rusb::TransferType::Bulk
                        && endpoint.direction() == rusb::Direction::Out
                    {
                        return Ok(Some(endpoint.address()));
                    }
                }
            }
        }

        Ok(None)
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<Box<dyn HostLink>, HostError> {
        let handle = self.device(device.id)?.open()?;
        debug!(
            "opened device {:04x}:{:04x}",
            device.vendor_id, device.product_id
        );
        Ok(Box::new(RusbLink { handle }))
    }

    fn events(&self) -> Receiver<HostEvent> {
        self.event_rx.clone()
    }

    fn pump(&mut self, timeout: Duration) -> Result<(), HostError> {
        match self.context.handle_events(Some(timeout)) {
            Ok(()) => Ok(()),
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn assign_id(
    ids: &std::sync::Mutex<HashMap<(u8, u8), DeviceId>>,
    next_id: &AtomicU32,
    key: (u8, u8),
) -> DeviceId {
    *ids.lock()
        .unwrap()
        .entry(key)
        .or_insert_with(|| DeviceId(next_id.fetch_add(1, Ordering::SeqCst)))
}

/// Hot-plug callback feeding the host event queue
///
/// libusb forbids device I/O from inside the callback, so attach events
/// carry identity only; string descriptors are filled in by the next
/// enumeration.
struct HotplugMonitor {
    event_tx: Sender<HostEvent>,
    ids: Arc<std::sync::Mutex<HashMap<(u8, u8), DeviceId>>>,
    next_id: Arc<AtomicU32>,
}

impl Hotplug<Context> for HotplugMonitor {
    fn device_arrived(&mut self, device: Device<Context>) {
        let Ok(descriptor) = device.device_descriptor() else {
            return;
        };
        let key = (device.bus_number(), device.address());
        let id = assign_id(&self.ids, &self.next_id, key);

        let info = DeviceInfo {
            id,
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            device_name: Some(format!("Bus {:03} Device {:03}", key.0, key.1)),
            manufacturer: None,
            product: None,
        };
        debug!(
            "device attached {:04x}:{:04x}",
            info.vendor_id, info.product_id
        );
        if self
            .event_tx
            .try_send(HostEvent::DeviceAttached { device: info })
            .is_err()
        {
            warn!("host event queue full, dropping attach event");
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let key = (device.bus_number(), device.address());
        let removed = self.ids.lock().unwrap().remove(&key);
        let Some(id) = removed else {
            return;
        };

        debug!("device detached (bus {:03} addr {:03})", key.0, key.1);
        if self
            .event_tx
            .try_send(HostEvent::DeviceDetached { device: id })
            .is_err()
        {
            warn!("host event queue full, dropping detach event");
        }
    }
}

/// One open rusb connection
struct RusbLink {
    handle: DeviceHandle<Context>,
}

impl HostLink for RusbLink {
    fn claim_interface(&mut self, interface: u8) -> Result<(), HostError> {
        // The kernel printer driver (usblp) usually holds the interface;
        // detach it first so the claim can succeed.
        match self.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("detaching kernel driver from interface {}", interface);
                if let Err(e) = self.handle.detach_kernel_driver(interface) {
                    warn!("failed to detach kernel driver: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!("could not query kernel driver state: {}", e);
            }
        }

        self.handle.claim_interface(interface)?;
        debug!("claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), HostError> {
        self.handle.release_interface(interface)?;
        if let Err(e) = self.handle.attach_kernel_driver(interface) {
            debug!("could not reattach kernel driver: {}", e);
        }
        debug!("released interface {}", interface);
        Ok(())
    }

    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError> {
        Ok(self.handle.write_bulk(endpoint, data, timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_id_is_stable_per_key() {
        let ids = std::sync::Mutex::new(HashMap::new());
        let next = AtomicU32::new(1);

        let a = assign_id(&ids, &next, (1, 4));
        let b = assign_id(&ids, &next, (1, 5));
        let a_again = assign_id(&ids, &next, (1, 4));

        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn test_host_creation() {
        // USB context creation may fail in sandboxed environments; we only
        // verify the attempt does not panic.
        match RusbHost::new() {
            Ok(_) => {}
            Err(e) => eprintln!("USB host creation failed (expected without USB access): {e}"),
        }
    }
}
