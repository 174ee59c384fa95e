//! Device and transfer type definitions
//!
//! Core types shared between the connection manager, the transfer engine,
//! and the async facade.

use crate::error::PayloadError;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Registry-assigned device identifier
///
/// Stable for as long as the device stays attached. A device that is
/// unplugged and replugged is assigned a fresh identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Transfer identifier (worker-assigned, monotonic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub u64);

/// Identifying attributes of an enumerated USB device
///
/// The display strings come from string descriptors and may be absent
/// depending on the device and platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Registry-assigned identifier
    pub id: DeviceId,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Platform device name (if available)
    pub device_name: Option<String>,
    /// Manufacturer string (if available)
    pub manufacturer: Option<String>,
    /// Product string (if available)
    pub product: Option<String>,
}

impl DeviceInfo {
    /// Whether this device matches a vendor/product identifier pair.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Permission status for the currently selected device
///
/// Transitions only via the host permission channel or a fresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    /// Never asked, or invalidated by a detach
    Unknown,
    /// Request issued, outcome pending
    Requested,
    /// Platform granted access
    Granted,
    /// Platform or user refused access
    Denied,
}

/// Outcome of a device selection
///
/// Selection returns optimistically: `PermissionPending` means the selection
/// was accepted and a permission request is in flight, not that the device
/// is ready to transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStatus {
    /// Device is authorized; a transfer may open the connection lazily.
    Ready,
    /// Permission request issued; the outcome arrives as an event.
    PermissionPending,
}

/// Progress of an in-flight transfer
///
/// `bytes_sent` increases monotonically up to `total_bytes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes the device has accepted so far
    pub bytes_sent: u64,
    /// Total payload size in bytes
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completion percentage, saturating at 100.
    pub fn percent(&self) -> u64 {
        if self.total_bytes == 0 {
            100
        } else {
            (self.bytes_sent * 100 / self.total_bytes).min(100)
        }
    }
}

/// Final accounting for a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Bytes the device reported accepting
    pub bytes_sent: u64,
    /// Number of chunks delivered
    pub chunks_sent: u64,
}

/// One logical write request, before reduction to bytes
///
/// The three flavors mirror the facade's print API: plain text (UTF-8 encoded),
/// base64-encoded text, and raw bytes. They are equivalent once decoded;
/// the transfer engine only ever sees bytes.
#[derive(Debug, Clone)]
pub enum PrintPayload {
    /// UTF-8 text
    Text(String),
    /// Base64-encoded data (standard alphabet, padded)
    Base64(String),
    /// Raw bytes
    Raw(Vec<u8>),
}

impl PrintPayload {
    /// Reduce the payload to the byte sequence handed to the transfer engine.
    pub fn into_bytes(self) -> Result<Vec<u8>, PayloadError> {
        match self {
            PrintPayload::Text(text) => Ok(text.into_bytes()),
            PrintPayload::Base64(data) => {
                let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
                Ok(bytes)
            }
            PrintPayload::Raw(bytes) => Ok(bytes),
        }
    }
}
