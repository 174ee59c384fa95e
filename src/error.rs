//! Error taxonomy
//!
//! Every failure in this crate is scoped to the current device or transfer;
//! nothing here is process-fatal. Connection manager errors return
//! synchronously from the call that detected them, transfer engine failures
//! travel through the transfer outcome channel.

use crate::types::PermissionState;
use thiserror::Error;

/// Low-level host/transport failure
///
/// Mirrors the libusb error set so backends other than rusb can report the
/// same conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Transfer timed out
    #[error("transfer timed out")]
    Timeout,
    /// Endpoint stalled (protocol error)
    #[error("endpoint stalled")]
    Pipe,
    /// Device was disconnected
    #[error("device disconnected")]
    NoDevice,
    /// Device or endpoint not found
    #[error("device or endpoint not found")]
    NotFound,
    /// Device is busy
    #[error("device busy")]
    Busy,
    /// Buffer overflow
    #[error("buffer overflow")]
    Overflow,
    /// I/O error
    #[error("I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid parameter")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

impl From<rusb::Error> for HostError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => HostError::Timeout,
            rusb::Error::Pipe => HostError::Pipe,
            rusb::Error::NoDevice => HostError::NoDevice,
            rusb::Error::NotFound => HostError::NotFound,
            rusb::Error::Busy => HostError::Busy,
            rusb::Error::Overflow => HostError::Overflow,
            rusb::Error::Io => HostError::Io,
            rusb::Error::InvalidParam => HostError::InvalidParam,
            rusb::Error::Access => HostError::Access,
            _ => HostError::Other {
                message: err.to_string(),
            },
        }
    }
}

/// Device selection failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// No USB devices enumerated at all
    #[error("no USB devices enumerated")]
    NoDevices,
    /// No enumerated device matches the requested identity
    #[error("no device matches {vendor_id:#06x}:{product_id:#06x}")]
    NotFound { vendor_id: u16, product_id: u16 },
    /// Registry enumeration failed
    #[error("device enumeration failed: {0}")]
    Registry(#[source] HostError),
    /// The platform refused the permission request itself
    #[error("permission request failed: {0}")]
    PermissionRequest(#[source] HostError),
}

/// Connection open failure
///
/// The variants distinguish "wrong device" (`NoSuchEndpoint`) from
/// "busy/unsupported device" (`OpenFailed`, `ClaimFailed`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    /// No device has been selected
    #[error("no device selected")]
    NoSelection,
    /// The selected device is not authorized; carries the permission state
    #[error("device not authorized (permission: {0:?})")]
    NotAuthorized(PermissionState),
    /// The inspected interface exposes no bulk-OUT endpoint
    #[error("no bulk-OUT endpoint on interface {interface}")]
    NoSuchEndpoint { interface: u8 },
    /// The platform refused to open the device
    #[error("failed to open device: {0}")]
    OpenFailed(#[source] HostError),
    /// The interface could not be claimed exclusively
    #[error("failed to claim interface: {0}")]
    ClaimFailed(#[source] HostError),
}

/// Payload decoding failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Base64 payload did not decode
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Transfer failure
///
/// Terminal for the transfer it belongs to only; the connection stays open
/// unless the device detached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Degenerate configuration, rejected before any slicing
    #[error("chunk size must be a positive integer")]
    InvalidChunkSize,
    /// Payload could not be reduced to bytes
    #[error("payload rejected: {0}")]
    Payload(#[from] PayloadError),
    /// No connection could be established; no I/O was attempted
    #[error("connection not available: {0}")]
    NotConnected(#[from] OpenError),
    /// A chunk exhausted its retry budget
    #[error("chunk at offset {offset} failed after {attempts} attempts: {source}")]
    ChunkFailed {
        offset: usize,
        attempts: u32,
        #[source]
        source: HostError,
    },
    /// The connection was closed while the transfer was in flight
    #[error("transfer cancelled by connection close")]
    Cancelled,
}

/// Top-level error for facade calls
#[derive(Debug, Error)]
pub enum Error {
    #[error("selection failed: {0}")]
    Select(#[from] SelectError),

    #[error("open failed: {0}")]
    Open(#[from] OpenError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("USB host error: {0}")]
    Host(#[from] HostError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker unavailable: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(HostError::from(rusb::Error::Timeout), HostError::Timeout);
        assert_eq!(HostError::from(rusb::Error::Pipe), HostError::Pipe);
        assert_eq!(HostError::from(rusb::Error::NoDevice), HostError::NoDevice);
        assert_eq!(HostError::from(rusb::Error::Access), HostError::Access);
    }

    #[test]
    fn test_open_error_distinguishes_causes() {
        let wrong_device = OpenError::NoSuchEndpoint { interface: 0 };
        let busy_device = OpenError::ClaimFailed(HostError::Busy);
        assert_ne!(wrong_device, busy_device);
    }

    #[test]
    fn test_transfer_error_from_open_error() {
        let err: TransferError = OpenError::NoSelection.into();
        assert!(matches!(
            err,
            TransferError::NotConnected(OpenError::NoSelection)
        ));
    }
}
