//! Test utilities
//!
//! A scriptable in-memory `UsbHost` implementation plus mock device
//! constructors and timeout helpers, used by the unit tests and the
//! integration suite.

use crate::error::HostError;
use crate::host::{HostEvent, HostLink, UsbHost};
use crate::types::{DeviceId, DeviceInfo};
use async_channel::{Receiver, Sender, bounded};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Await a future with a timeout.
pub async fn with_timeout<F: Future>(
    duration: Duration,
    future: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    tokio::time::timeout(duration, future).await
}

/// Create a mock DeviceInfo for testing.
pub fn mock_device(id: u32, vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId(id),
        vendor_id,
        product_id,
        device_name: Some(format!("Mock Device {}", id)),
        manufacturer: Some("Mock Manufacturer".to_string()),
        product: Some(format!("Mock Printer {}", id)),
    }
}

struct MockState {
    devices: Vec<DeviceInfo>,
    granted: HashSet<DeviceId>,
    /// Permission requests issued so far, in order
    requests: Vec<DeviceId>,
    /// When set, `request_permission` resolves immediately with this outcome
    auto_grant: Option<bool>,
    /// Bulk-OUT endpoint address on interface 0; `None` simulates a device
    /// without a suitable endpoint
    bulk_endpoint: Option<u8>,
    open_error: Option<HostError>,
    claim_error: Option<HostError>,
    /// Scripted results for upcoming bulk writes; empty means success
    write_script: VecDeque<Result<usize, HostError>>,
    /// Successfully delivered chunks, in order
    writes: Vec<Vec<u8>>,
    /// Total bulk write attempts, including failed ones
    write_attempts: u32,
    opens: u32,
    releases: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            granted: HashSet::new(),
            requests: Vec::new(),
            auto_grant: None,
            bulk_endpoint: Some(0x01),
            open_error: None,
            claim_error: None,
            write_script: VecDeque::new(),
            writes: Vec::new(),
            write_attempts: 0,
            opens: 0,
            releases: 0,
        }
    }
}

/// Scriptable mock USB host
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
    event_tx: Sender<HostEvent>,
    event_rx: Receiver<HostEvent>,
}

/// Control handle for a [`MockHost`]
///
/// Lets tests mutate the simulated device registry, resolve permissions,
/// script failures, and inspect delivered writes while the host itself is
/// owned by the worker.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    event_tx: Sender<HostEvent>,
}

impl MockHost {
    pub fn new() -> (MockHost, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let (event_tx, event_rx) = bounded(64);

        let handle = MockHandle {
            state: Arc::clone(&state),
            event_tx: event_tx.clone(),
        };

        (
            MockHost {
                state,
                event_tx,
                event_rx,
            },
            handle,
        )
    }
}

impl MockHandle {
    /// Add a device to the simulated registry (no event emitted).
    pub fn add_device(&self, device: DeviceInfo) {
        self.state.lock().unwrap().devices.push(device);
    }

    /// Add a device and emit an attach event.
    pub fn attach_device(&self, device: DeviceInfo) {
        self.add_device(device.clone());
        self.event_tx
            .try_send(HostEvent::DeviceAttached { device })
            .unwrap();
    }

    /// Remove a device and emit a detach event.
    pub fn detach_device(&self, id: DeviceId) {
        {
            let mut state = self.state.lock().unwrap();
            state.devices.retain(|d| d.id != id);
            state.granted.remove(&id);
        }
        self.event_tx
            .try_send(HostEvent::DeviceDetached { device: id })
            .unwrap();
    }

    /// Pre-grant platform permission for a device.
    pub fn grant(&self, id: DeviceId) {
        self.state.lock().unwrap().granted.insert(id);
    }

    /// Make future permission requests resolve immediately.
    pub fn set_auto_grant(&self, granted: bool) {
        self.state.lock().unwrap().auto_grant = Some(granted);
    }

    /// Resolve an outstanding permission request.
    pub fn resolve_permission(&self, id: DeviceId, granted: bool) {
        if granted {
            self.state.lock().unwrap().granted.insert(id);
        }
        self.event_tx
            .try_send(HostEvent::PermissionResolved {
                device: id,
                granted,
            })
            .unwrap();
    }

    /// Permission requests issued so far.
    pub fn requests(&self) -> Vec<DeviceId> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Configure the bulk-OUT endpoint exposed on interface 0.
    pub fn set_bulk_endpoint(&self, endpoint: Option<u8>) {
        self.state.lock().unwrap().bulk_endpoint = endpoint;
    }

    /// Make the next `open` call fail.
    pub fn fail_open(&self, error: HostError) {
        self.state.lock().unwrap().open_error = Some(error);
    }

    /// Make the next `claim_interface` call fail.
    pub fn fail_claim(&self, error: HostError) {
        self.state.lock().unwrap().claim_error = Some(error);
    }

    /// Queue a scripted result for an upcoming bulk write.
    pub fn script_write(&self, result: Result<usize, HostError>) {
        self.state.lock().unwrap().write_script.push_back(result);
    }

    /// Queue `count` consecutive write failures.
    pub fn script_write_failures(&self, count: u32, error: HostError) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state.write_script.push_back(Err(error.clone()));
        }
    }

    /// Chunks the device accepted, in delivery order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Total bulk write attempts, including failed ones.
    pub fn write_attempts(&self) -> u32 {
        self.state.lock().unwrap().write_attempts
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    pub fn release_count(&self) -> u32 {
        self.state.lock().unwrap().releases
    }
}

impl UsbHost for MockHost {
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, HostError> {
        Ok(self.state.lock().unwrap().devices.clone())
    }

    fn has_permission(&mut self, device: &DeviceInfo) -> bool {
        self.state.lock().unwrap().granted.contains(&device.id)
    }

    fn request_permission(&mut self, device: &DeviceInfo) -> Result<(), HostError> {
        let auto_grant = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(device.id);
            state.auto_grant
        };

        if let Some(granted) = auto_grant {
            if granted {
                self.state.lock().unwrap().granted.insert(device.id);
            }
            let _ = self.event_tx.try_send(HostEvent::PermissionResolved {
                device: device.id,
                granted,
            });
        }
        Ok(())
    }

    fn bulk_out_endpoint(
        &mut self,
        _device: &DeviceInfo,
        _interface: u8,
    ) -> Result<Option<u8>, HostError> {
        Ok(self.state.lock().unwrap().bulk_endpoint)
    }

    fn open(&mut self, _device: &DeviceInfo) -> Result<Box<dyn HostLink>, HostError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.open_error.take() {
            return Err(error);
        }
        state.opens += 1;
        Ok(Box::new(MockLink {
            state: Arc::clone(&self.state),
        }))
    }

    fn events(&self) -> Receiver<HostEvent> {
        self.event_rx.clone()
    }

    fn pump(&mut self, timeout: Duration) -> Result<(), HostError> {
        // Nothing to drive; keep the worker loop from spinning.
        std::thread::sleep(timeout.min(Duration::from_millis(2)));
        Ok(())
    }
}

struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl HostLink for MockLink {
    fn claim_interface(&mut self, _interface: u8) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.claim_error.take() {
            return Err(error);
        }
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<(), HostError> {
        self.state.lock().unwrap().releases += 1;
        Ok(())
    }

    fn write_bulk(
        &mut self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, HostError> {
        let mut state = self.state.lock().unwrap();
        state.write_attempts += 1;

        match state.write_script.pop_front() {
            Some(Err(error)) => Err(error),
            Some(Ok(written)) => {
                state.writes.push(data.to_vec());
                Ok(written)
            }
            None => {
                state.writes.push(data.to_vec());
                Ok(data.len())
            }
        }
    }
}
