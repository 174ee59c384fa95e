//! Async printer facade
//!
//! `PrinterService` is the API surface callers hold: it forwards commands to
//! the worker thread and hands back tickets for transfers. Construct one per
//! process context that manages the printer's lifetime and pass it around
//! explicitly; there is no ambient global instance.

use crate::channel::{PrinterCommand, PrinterEvent, ServiceBridge, TransferStarted, create_bridge};
use crate::config::PrinterConfig;
use crate::error::{Error, Result, TransferError};
use crate::host::UsbHost;
use crate::transfer::{CancelToken, TransferSettings};
use crate::types::{DeviceInfo, PrintPayload, SelectStatus, TransferId, TransferProgress, TransferReport};
use crate::worker::spawn_worker;
use std::sync::Mutex;
use tracing::debug;

/// Handle onto one submitted transfer
///
/// Returned as soon as the transfer has *started*; completion or failure is
/// only observable here (or via the event stream), mirroring the
/// fire-and-forget submission model without losing the outcome.
pub struct TransferTicket {
    id: TransferId,
    progress: tokio::sync::watch::Receiver<TransferProgress>,
    outcome: tokio::sync::oneshot::Receiver<std::result::Result<TransferReport, TransferError>>,
}

impl TransferTicket {
    fn new(started: TransferStarted) -> Self {
        Self {
            id: started.id,
            progress: started.progress,
            outcome: started.outcome,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Watch receiver for progress snapshots.
    ///
    /// Only updated for payloads above the configured progress threshold.
    pub fn progress(&self) -> tokio::sync::watch::Receiver<TransferProgress> {
        self.progress.clone()
    }

    /// Wait for the transfer to complete.
    pub async fn wait(self) -> std::result::Result<TransferReport, TransferError> {
        match self.outcome.await {
            Ok(result) => result,
            // The worker went away mid-transfer.
            Err(_) => Err(TransferError::Cancelled),
        }
    }
}

/// Async facade over the printer worker thread
pub struct PrinterService {
    bridge: ServiceBridge,
    defaults: TransferSettings,
    /// Cancel token shared by every transfer submitted since the last close.
    /// Cancelling it reaches queued transfers as well as the in-flight one.
    active_cancel: Mutex<CancelToken>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl PrinterService {
    /// Spawn the worker thread and return the facade.
    pub fn spawn(host: Box<dyn UsbHost>) -> Self {
        Self::spawn_with_config(host, &PrinterConfig::default())
    }

    pub fn spawn_with_config(host: Box<dyn UsbHost>, config: &PrinterConfig) -> Self {
        let (bridge, endpoint) = create_bridge();
        let worker = spawn_worker(host, endpoint, config.usb.interface);

        Self {
            bridge,
            defaults: config.transfer.settings(),
            active_cancel: Mutex::new(CancelToken::default()),
            worker: Some(worker),
        }
    }

    /// Enumerate currently attached USB devices.
    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.bridge
            .send_command(PrinterCommand::ListDevices { response: tx })
            .await?;
        Ok(recv_response(rx).await??)
    }

    /// Target a device by vendor/product identifier pair.
    ///
    /// `Ready` means the device is authorized; `PermissionPending` means the
    /// selection was accepted and the permission outcome arrives later on
    /// the event stream. Treat both as "selection accepted", not "ready to
    /// transfer".
    pub async fn select_device(&self, vendor_id: u16, product_id: u16) -> Result<SelectStatus> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.bridge
            .send_command(PrinterCommand::SelectDevice {
                vendor_id,
                product_id,
                response: tx,
            })
            .await?;
        Ok(recv_response(rx).await??)
    }

    /// Close the connection, keeping the device selected.
    ///
    /// An in-flight transfer observes the cancellation between chunks and
    /// stops with an error; transfers still queued behind it are cancelled
    /// before their first chunk.
    pub async fn close_connection(&self) -> Result<()> {
        {
            let mut cancel = self.active_cancel.lock().unwrap();
            cancel.cancel();
            // Transfers submitted after the close get a fresh token.
            *cancel = CancelToken::default();
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.bridge
            .send_command(PrinterCommand::Close { response: tx })
            .await?;
        recv_response(rx).await
    }

    /// Submit a payload for transfer with the default settings.
    pub async fn transfer(&self, payload: PrintPayload) -> Result<TransferTicket> {
        self.transfer_with(payload, self.defaults).await
    }

    /// Submit a payload for transfer with explicit settings.
    ///
    /// Returns once the transfer has started; an error here means no I/O was
    /// attempted (no connection, bad payload, or bad settings).
    pub async fn transfer_with(
        &self,
        payload: PrintPayload,
        settings: TransferSettings,
    ) -> Result<TransferTicket> {
        let bytes = payload.into_bytes().map_err(TransferError::Payload)?;
        debug!(total_bytes = bytes.len(), "submitting transfer");

        let cancel = self.active_cancel.lock().unwrap().clone();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.bridge
            .send_command(PrinterCommand::SubmitTransfer {
                payload: bytes,
                settings,
                cancel,
                started: tx,
            })
            .await?;

        let started = recv_response(rx).await??;
        Ok(TransferTicket::new(started))
    }

    /// Print UTF-8 text.
    pub async fn print_text(&self, text: &str) -> Result<TransferTicket> {
        self.transfer(PrintPayload::Text(text.to_owned())).await
    }

    /// Print base64-encoded data.
    pub async fn print_base64(&self, data: &str) -> Result<TransferTicket> {
        self.transfer(PrintPayload::Base64(data.to_owned())).await
    }

    /// Print raw bytes.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<TransferTicket> {
        self.transfer(PrintPayload::Raw(bytes)).await
    }

    /// Receiver for worker events (permission results, hot-plug, transfer
    /// completion).
    pub fn events(&self) -> async_channel::Receiver<PrinterEvent> {
        self.bridge.events()
    }

    /// Shut down the worker thread and wait for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.active_cancel.lock().unwrap().cancel();
        self.bridge.send_command(PrinterCommand::Shutdown).await?;

        if let Some(handle) = self.worker.take() {
            tokio::task::spawn_blocking(move || {
                let _ = handle.join();
            })
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for PrinterService {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.active_cancel.lock().unwrap().cancel();
            self.bridge.try_send_command(PrinterCommand::Shutdown);
        }
    }
}

async fn recv_response<T>(rx: tokio::sync::oneshot::Receiver<T>) -> Result<T> {
    rx.await
        .map_err(|_| Error::Channel("worker dropped response".to_string()))
}
