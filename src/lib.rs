//! USB printer connection management and chunked bulk transfer
//!
//! This crate discovers USB printer-class devices, negotiates OS-mediated
//! access permission, opens a bulk-OUT connection, and streams arbitrary
//! byte payloads to it in bounded, retried chunks.
//!
//! The moving parts:
//! - [`host::UsbHost`] abstracts the OS USB subsystem (rusb-backed in
//!   production, scriptable mock in tests).
//! - [`manager::ConnectionManager`] owns the device selection, permission
//!   state, and the single open transport link.
//! - [`transfer`] slices payloads and drives each chunk with retry and
//!   backoff.
//! - [`service::PrinterService`] is the async facade; it forwards commands
//!   to a dedicated worker thread, which serializes all state transitions
//!   and transfers.
//!
//! ```no_run
//! use printlink::{PrinterService, host::RusbHost};
//!
//! # async fn example() -> printlink::Result<()> {
//! let host = RusbHost::new()?;
//! let printer = PrinterService::spawn(Box::new(host));
//!
//! printer.select_device(0x04b8, 0x0202).await?;
//! let ticket = printer.print_text("hello printer\n").await?;
//! let report = ticket.wait().await?;
//! println!("sent {} bytes", report.bytes_sent);
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod manager;
pub mod service;
pub mod test_utils;
pub mod transfer;
pub mod types;
mod worker;

pub use channel::{PrinterCommand, PrinterEvent, ServiceBridge, WorkerEndpoint, create_bridge};
pub use config::PrinterConfig;
pub use error::{Error, HostError, OpenError, PayloadError, Result, SelectError, TransferError};
pub use host::{HostEvent, HostLink, UsbHost};
pub use logging::setup_logging;
pub use manager::{ConnectionManager, OpenLink};
pub use service::{PrinterService, TransferTicket};
pub use transfer::{CancelToken, TransferSettings};
pub use types::{
    DeviceId, DeviceInfo, PermissionState, PrintPayload, SelectStatus, TransferId,
    TransferProgress, TransferReport,
};
