//! Chunked, retried bulk transfer engine
//!
//! Slices a payload into bounded chunks and drives each chunk through the
//! open connection with a bounded retry loop. Runs on the worker thread;
//! the inter-chunk delay and retry backoff sleep there, never on the
//! context issuing API calls.

use crate::error::{HostError, TransferError};
use crate::manager::OpenLink;
use crate::types::{TransferProgress, TransferReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default chunk size (8 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
/// Default attempt budget per chunk
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default pause before a retry attempt
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Default pause between delivered chunks
pub const DEFAULT_INTER_CHUNK_DELAY: Duration = Duration::from_millis(10);
/// Default per-chunk timeout enforced by the bulk-write primitive
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_millis(5000);
/// Payloads above this size report progress
pub const DEFAULT_PROGRESS_THRESHOLD: usize = 10_000;

/// Knobs for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    /// Maximum bytes per chunk; must be positive
    pub chunk_size: usize,
    /// Attempts per chunk; 0 is clamped to a single terminal attempt
    pub max_retries: u32,
    /// Pause before each retry attempt
    pub retry_backoff: Duration,
    /// Pause between delivered chunks (not after the last one)
    pub inter_chunk_delay: Duration,
    /// Timeout for one bulk write; a timed-out attempt counts as failed
    pub chunk_timeout: Duration,
    /// Progress is only emitted for payloads larger than this (policy knob)
    pub progress_threshold: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            inter_chunk_delay: DEFAULT_INTER_CHUNK_DELAY,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
        }
    }
}

impl TransferSettings {
    /// Default settings with a custom chunk size.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    /// Reject degenerate configurations before any slicing begins.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        Ok(())
    }
}

/// Number of chunks a payload of `len` bytes splits into at `chunk_size`.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size)
}

/// Cooperative cancellation flag shared between the facade and the worker
///
/// Set by `close_connection` before the close command is enqueued, so an
/// in-flight transfer observes the cancellation between chunks instead of
/// racing a closing handle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drive a whole payload through the open connection.
///
/// Aborts on the first chunk that exhausts its retry budget, leaving the
/// connection open and the remaining chunks unwritten.
pub fn run(
    link: &mut OpenLink,
    payload: &[u8],
    settings: &TransferSettings,
    progress: &watch::Sender<TransferProgress>,
    cancel: &CancelToken,
) -> Result<TransferReport, TransferError> {
    settings.validate()?;

    let total = payload.len();
    let report_progress = total > settings.progress_threshold;
    info!(
        total_bytes = total,
        chunk_size = settings.chunk_size,
        "starting chunked transfer"
    );

    let mut bytes_sent = 0u64;
    let mut chunks_sent = 0u64;
    let mut offset = 0usize;

    for chunk in payload.chunks(settings.chunk_size) {
        if cancel.is_cancelled() {
            warn!(offset, "transfer cancelled before chunk");
            return Err(TransferError::Cancelled);
        }

        let written = write_chunk(link, chunk, offset, settings)?;
        bytes_sent += written as u64;
        chunks_sent += 1;
        offset += chunk.len();

        if report_progress {
            let snapshot = TransferProgress {
                bytes_sent,
                total_bytes: total as u64,
            };
            let _ = progress.send(snapshot);
            info!(
                "transfer progress: {}% ({}/{} bytes)",
                snapshot.percent(),
                bytes_sent,
                total
            );
        }

        // Small pause so the device's input buffer can drain.
        if offset < total {
            std::thread::sleep(settings.inter_chunk_delay);
        }
    }

    info!(bytes_sent, chunks_sent, "transfer completed");
    Ok(TransferReport {
        bytes_sent,
        chunks_sent,
    })
}

/// Submit one chunk with a bounded retry loop.
///
/// A non-negative byte count is success; short counts are not retried at the
/// sub-chunk level.
fn write_chunk(
    link: &mut OpenLink,
    chunk: &[u8],
    offset: usize,
    settings: &TransferSettings,
) -> Result<usize, TransferError> {
    let attempts = settings.max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            warn!(offset, attempt = attempt + 1, "retrying chunk");
            std::thread::sleep(settings.retry_backoff);
        }

        match link.write_bulk(chunk, settings.chunk_timeout) {
            Ok(written) => {
                if attempt > 0 {
                    info!(offset, retries = attempt, "chunk succeeded on retry");
                } else {
                    debug!(offset, written, "chunk delivered");
                }
                return Ok(written);
            }
            Err(e) => {
                warn!(offset, "chunk write failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(TransferError::ChunkFailed {
        offset,
        attempts,
        source: last_error.unwrap_or(HostError::Io),
    })
}
