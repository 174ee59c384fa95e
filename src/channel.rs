//! Async channel bridge between the tokio facade and the printer worker
//!
//! Commands flow facade -> worker over a bounded async channel; each command
//! carries a oneshot for its synchronous part of the answer. Worker events
//! (permission results, hot-plug, transfer completion) flow back on a second
//! channel.

use crate::error::{Error, HostError, SelectError, TransferError};
use crate::transfer::{CancelToken, TransferSettings};
use crate::types::{
    DeviceId, DeviceInfo, SelectStatus, TransferId, TransferProgress, TransferReport,
};
use async_channel::{Receiver, Sender, bounded};
use tracing::warn;

/// Channel capacity for commands and events
const BRIDGE_CAPACITY: usize = 64;

/// Commands from the facade to the worker thread
pub enum PrinterCommand {
    /// Enumerate currently attached devices
    ListDevices {
        response: tokio::sync::oneshot::Sender<Result<Vec<DeviceInfo>, HostError>>,
    },

    /// Target a device by vendor/product pair
    SelectDevice {
        vendor_id: u16,
        product_id: u16,
        response: tokio::sync::oneshot::Sender<Result<SelectStatus, SelectError>>,
    },

    /// Close the connection, keeping the selection
    Close {
        response: tokio::sync::oneshot::Sender<()>,
    },

    /// Submit one chunked transfer
    ///
    /// `started` answers as soon as the connection is established (or could
    /// not be); the outcome of the actual I/O arrives on the channels inside
    /// [`TransferStarted`].
    SubmitTransfer {
        payload: Vec<u8>,
        settings: TransferSettings,
        cancel: CancelToken,
        started: tokio::sync::oneshot::Sender<Result<TransferStarted, TransferError>>,
    },

    /// Shut down the worker thread gracefully
    Shutdown,
}

/// Handles to observe a transfer that has started
pub struct TransferStarted {
    pub id: TransferId,
    /// Progress snapshots; only updated for payloads above the threshold
    pub progress: tokio::sync::watch::Receiver<TransferProgress>,
    /// Final outcome of the transfer
    pub outcome: tokio::sync::oneshot::Receiver<Result<TransferReport, TransferError>>,
}

/// Events from the worker to facade observers
#[derive(Debug, Clone)]
pub enum PrinterEvent {
    /// A permission request was resolved
    PermissionResolved { device: DeviceId, granted: bool },
    /// A device was plugged in
    DeviceAttached { device: DeviceInfo },
    /// A device was unplugged
    DeviceDetached { device: DeviceId },
    /// A transfer finished, successfully or not
    TransferFinished {
        id: TransferId,
        outcome: Result<TransferReport, TransferError>,
    },
}

/// Facade side of the bridge (async)
#[derive(Clone)]
pub struct ServiceBridge {
    cmd_tx: Sender<PrinterCommand>,
    event_rx: Receiver<PrinterEvent>,
}

impl ServiceBridge {
    /// Send a command to the worker thread.
    pub async fn send_command(&self, cmd: PrinterCommand) -> Result<(), Error> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// Best-effort send for non-async contexts (Drop).
    pub fn try_send_command(&self, cmd: PrinterCommand) -> bool {
        self.cmd_tx.try_send(cmd).is_ok()
    }

    /// Receive the next worker event.
    pub async fn recv_event(&self) -> Result<PrinterEvent, Error> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// A receiver handle onto the event stream.
    pub fn events(&self) -> Receiver<PrinterEvent> {
        self.event_rx.clone()
    }
}

/// Worker side of the bridge (blocking)
pub struct WorkerEndpoint {
    cmd_rx: Receiver<PrinterCommand>,
    event_tx: Sender<PrinterEvent>,
}

impl WorkerEndpoint {
    /// Poll for a command without blocking.
    pub fn try_recv_command(&self) -> Option<PrinterCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Emit an event toward the facade.
    ///
    /// Events are advisory; when nobody drains the stream the event is
    /// dropped rather than blocking the worker.
    pub fn send_event(&self, event: PrinterEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("event queue full or closed, dropping printer event");
        }
    }
}

/// Create the bridge between the facade and the worker thread.
pub fn create_bridge() -> (ServiceBridge, WorkerEndpoint) {
    let (cmd_tx, cmd_rx) = bounded(BRIDGE_CAPACITY);
    let (event_tx, event_rx) = bounded(BRIDGE_CAPACITY);

    (
        ServiceBridge { cmd_tx, event_rx },
        WorkerEndpoint { cmd_rx, event_tx },
    )
}
