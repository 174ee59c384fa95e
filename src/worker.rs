//! Printer worker thread
//!
//! Dedicated thread owning the connection manager. Processes facade commands
//! and host events one at a time, which serializes every state transition
//! and every transfer: two transfers submitted concurrently execute in
//! submission order, never chunk-interleaved.

use crate::channel::{PrinterCommand, PrinterEvent, TransferStarted, WorkerEndpoint};
use crate::error::TransferError;
use crate::host::{HostEvent, UsbHost};
use crate::manager::ConnectionManager;
use crate::transfer::{self, CancelToken, TransferSettings};
use crate::types::{TransferId, TransferProgress};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one loop iteration lets the host pump events
const PUMP_TIMEOUT: Duration = Duration::from_millis(100);

/// Printer worker
pub struct PrinterWorker {
    manager: ConnectionManager,
    endpoint: WorkerEndpoint,
    host_events: async_channel::Receiver<HostEvent>,
    next_transfer_id: u64,
}

impl PrinterWorker {
    pub fn new(host: Box<dyn UsbHost>, endpoint: WorkerEndpoint, interface: u8) -> Self {
        let host_events = host.events();
        Self {
            manager: ConnectionManager::with_interface(host, interface),
            endpoint,
            host_events,
            next_transfer_id: 1,
        }
    }

    /// Run the worker loop until a `Shutdown` command arrives.
    pub fn run(mut self) {
        info!("printer worker started");

        loop {
            match self.endpoint.try_recv_command() {
                Some(PrinterCommand::Shutdown) => {
                    info!("printer worker shutting down");
                    break;
                }
                Some(cmd) => {
                    self.handle_command(cmd);
                    continue;
                }
                None => {}
            }

            while let Ok(event) = self.host_events.try_recv() {
                self.handle_host_event(event);
            }

            self.manager.pump_host(PUMP_TIMEOUT);
        }

        self.manager.close();
        info!("printer worker stopped");
    }

    fn handle_command(&mut self, cmd: PrinterCommand) {
        // Contain panics so a bad command cannot take the worker down.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("panic in printer command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: PrinterCommand) {
        match cmd {
            PrinterCommand::ListDevices { response } => {
                let devices = self.manager.list_devices();
                if let Ok(devices) = &devices {
                    debug!("listing {} devices", devices.len());
                }
                let _ = response.send(devices);
            }

            PrinterCommand::SelectDevice {
                vendor_id,
                product_id,
                response,
            } => {
                debug!("selecting device {:04x}:{:04x}", vendor_id, product_id);
                let _ = response.send(self.manager.select_device(vendor_id, product_id));
            }

            PrinterCommand::Close { response } => {
                self.manager.close();
                let _ = response.send(());
            }

            PrinterCommand::SubmitTransfer {
                payload,
                settings,
                cancel,
                started,
            } => {
                self.handle_transfer(payload, settings, cancel, started);
            }

            PrinterCommand::Shutdown => {
                // The main loop exits on Shutdown before dispatching here;
                // treat a stray one as a no-op rather than a panic path.
                debug!("shutdown command reached the dispatch handler, ignoring");
            }
        }
    }

    fn handle_transfer(
        &mut self,
        payload: Vec<u8>,
        settings: TransferSettings,
        cancel: CancelToken,
        started: tokio::sync::oneshot::Sender<Result<TransferStarted, TransferError>>,
    ) {
        if let Err(e) = settings.validate() {
            let _ = started.send(Err(e));
            return;
        }

        let link = match self.manager.ensure_open() {
            Ok(link) => link,
            Err(e) => {
                warn!("transfer rejected, no connection: {}", e);
                let _ = started.send(Err(TransferError::NotConnected(e)));
                return;
            }
        };

        let id = TransferId(self.next_transfer_id);
        self.next_transfer_id += 1;

        let (progress_tx, progress_rx) = tokio::sync::watch::channel(TransferProgress {
            bytes_sent: 0,
            total_bytes: payload.len() as u64,
        });
        let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();

        // The caller only learns that the transfer started; completion
        // arrives on the outcome channel and as an event.
        let _ = started.send(Ok(TransferStarted {
            id,
            progress: progress_rx,
            outcome: outcome_rx,
        }));

        let result = transfer::run(link, &payload, &settings, &progress_tx, &cancel);
        match &result {
            Ok(report) => debug!(?id, bytes_sent = report.bytes_sent, "transfer finished"),
            Err(e) => warn!(?id, "transfer failed: {}", e),
        }

        let _ = outcome_tx.send(result.clone());
        self.endpoint
            .send_event(PrinterEvent::TransferFinished { id, outcome: result });
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::PermissionResolved { device, granted } => {
                self.manager.on_permission_result(device, granted);
                self.endpoint
                    .send_event(PrinterEvent::PermissionResolved { device, granted });
            }
            HostEvent::DeviceAttached { device } => {
                self.manager.on_device_attached(&device);
                self.endpoint
                    .send_event(PrinterEvent::DeviceAttached { device });
            }
            HostEvent::DeviceDetached { device } => {
                self.manager.on_device_detached(device);
                self.endpoint
                    .send_event(PrinterEvent::DeviceDetached { device });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::create_bridge;
    use crate::test_utils::MockHost;

    #[test]
    fn test_stray_shutdown_command_is_ignored() {
        let (host, _handle) = MockHost::new();
        let (_bridge, endpoint) = create_bridge();
        let mut worker = PrinterWorker::new(Box::new(host), endpoint, 0);

        // Shutdown is normally consumed by the main loop; dispatching it
        // directly must be a no-op, not a panic. Bypass the panic
        // containment wrapper so a regression surfaces here.
        worker.handle_command_inner(PrinterCommand::Shutdown);
    }
}

/// Spawn the printer worker on its own OS thread.
pub fn spawn_worker(
    host: Box<dyn UsbHost>,
    endpoint: WorkerEndpoint,
    interface: u8,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("usb-printer".to_string())
        .spawn(move || {
            PrinterWorker::new(host, endpoint, interface).run();
        })
        .expect("failed to spawn printer worker thread")
}
