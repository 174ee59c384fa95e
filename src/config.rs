//! Library configuration
//!
//! TOML-backed settings for the USB policy and the transfer engine. Every
//! field has a default so an empty file (or no file) is a valid
//! configuration.

use crate::transfer::TransferSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub transfer: TransferOptions,
    /// Default tracing filter, overridable via `RUST_LOG`
    #[serde(default = "PrinterConfig::default_log_level")]
    pub log_level: String,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            usb: UsbSettings::default(),
            transfer: TransferOptions::default(),
            log_level: Self::default_log_level(),
        }
    }
}

impl PrinterConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Interface index inspected for a bulk-OUT endpoint
    #[serde(default)]
    pub interface: u8,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self { interface: 0 }
    }
}

/// Transfer engine knobs, as stored in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    #[serde(default = "TransferOptions::default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "TransferOptions::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "TransferOptions::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "TransferOptions::default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,
    #[serde(default = "TransferOptions::default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
    #[serde(default = "TransferOptions::default_progress_threshold")]
    pub progress_threshold: usize,
}

impl TransferOptions {
    fn default_chunk_size() -> usize {
        crate::transfer::DEFAULT_CHUNK_SIZE
    }

    fn default_max_retries() -> u32 {
        crate::transfer::DEFAULT_MAX_RETRIES
    }

    fn default_retry_backoff_ms() -> u64 {
        crate::transfer::DEFAULT_RETRY_BACKOFF.as_millis() as u64
    }

    fn default_inter_chunk_delay_ms() -> u64 {
        crate::transfer::DEFAULT_INTER_CHUNK_DELAY.as_millis() as u64
    }

    fn default_chunk_timeout_ms() -> u64 {
        crate::transfer::DEFAULT_CHUNK_TIMEOUT.as_millis() as u64
    }

    fn default_progress_threshold() -> usize {
        crate::transfer::DEFAULT_PROGRESS_THRESHOLD
    }

    /// Materialize engine settings from the stored values.
    pub fn settings(&self) -> TransferSettings {
        TransferSettings {
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            inter_chunk_delay: Duration::from_millis(self.inter_chunk_delay_ms),
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
            progress_threshold: self.progress_threshold,
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: Self::default_chunk_size(),
            max_retries: Self::default_max_retries(),
            retry_backoff_ms: Self::default_retry_backoff_ms(),
            inter_chunk_delay_ms: Self::default_inter_chunk_delay_ms(),
            chunk_timeout_ms: Self::default_chunk_timeout_ms(),
            progress_threshold: Self::default_progress_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: PrinterConfig = toml::from_str("").unwrap();
        assert_eq!(config.usb.interface, 0);
        assert_eq!(config.transfer.chunk_size, 8192);
        assert_eq!(config.transfer.max_retries, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_override() {
        let config: PrinterConfig = toml::from_str(
            r#"
            log_level = "debug"

            [transfer]
            chunk_size = 4096
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.transfer.chunk_size, 4096);
        assert_eq!(config.transfer.max_retries, 5);
        // Untouched fields keep their defaults
        assert_eq!(config.transfer.retry_backoff_ms, 100);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_settings_conversion() {
        let options = TransferOptions {
            retry_backoff_ms: 250,
            ..TransferOptions::default()
        };
        let settings = options.settings();
        assert_eq!(settings.retry_backoff, Duration::from_millis(250));
        assert_eq!(settings.chunk_size, 8192);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = PrinterConfig::load(Path::new("/nonexistent/printlink.toml"));
        assert!(result.is_err());
    }
}
