//! Configuration
//!
//! This module contains configuration types for the adapter, the client
//! (transport/correlator), the Trionic 8 bootloader upload and the retry
//! policy used for readiness polling. Every section has defaults, so an
//! empty TOML document is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanflashConfig {
    /// Adapter selection, passed through to the adapter untouched
    #[serde(default)]
    pub adapter: AdapterConfig,
    /// Client queue and timing settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Bootloader upload parameters
    #[serde(default)]
    pub bootloader: BootloaderConfig,
    /// Readiness polling
    #[serde(default)]
    pub retry: RetryConfig,
}

impl CanflashConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the upload engine cannot work with
    pub fn validate(&self) -> Result<(), Error> {
        self.bootloader.validate()?;
        if self.client.send_queue_depth == 0 {
            return Err(Error::Config(
                "client.send_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(Error::Config("retry.attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Image bytes carried by one streamed frame (the first byte is the sequence)
pub const FRAME_PAYLOAD: usize = 7;

/// Bytes of a transfer announcement covered by its length byte before any
/// image data: service, sub-function and the 4-byte address
pub const TRANSFER_HEADER_LEN: usize = 6;

// =============================================================================
// Adapter Configuration
// =============================================================================

/// Adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdapterConfig {
    /// Raw SocketCAN (Linux only)
    SocketCan(SocketCanConfig),
    /// In-memory adapter with a simulated Trionic 8
    Mock(MockConfig),
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// SocketCAN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0")
    pub interface: String,
    /// CAN bus bitrate, informational; the interface is configured outside
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

fn default_bitrate() -> u32 {
    500000
}

impl SocketCanConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            bitrate: default_bitrate(),
        }
    }
}

/// Mock adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Transport/correlator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Outbound queue depth; `send` blocks once it is full
    #[serde(default = "default_send_queue_depth")]
    pub send_queue_depth: usize,
    /// Buffered frames per passive subscriber
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    /// Timeout for request/response exchanges (ms)
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// How long `close` lets queued frames drain (ms)
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

fn default_send_queue_depth() -> usize {
    100
}

fn default_subscriber_capacity() -> usize {
    1024
}

fn default_timeout_ms() -> u64 {
    150
}

fn default_close_grace_ms() -> u64 {
    200
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            send_queue_depth: default_send_queue_depth(),
            subscriber_capacity: default_subscriber_capacity(),
            default_timeout_ms: default_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl ClientConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

// =============================================================================
// Bootloader Configuration
// =============================================================================

/// Trionic 8 bootloader upload parameters
///
/// Defaults match the Legion bootloader on a Trionic 8 main processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootloaderConfig {
    /// Request CAN ID (tester -> ECU)
    #[serde(default = "default_tx_id")]
    pub tx_id: u32,
    /// Response CAN ID (ECU -> tester)
    #[serde(default = "default_rx_id")]
    pub rx_id: u32,
    /// Functional CAN ID for tester-present keep-alives
    #[serde(default = "default_keepalive_id")]
    pub keepalive_id: u32,
    /// Load address of the image
    #[serde(default = "default_start_address")]
    pub start_address: u32,
    /// Image bytes consumed per full chunk (frames per chunk x 7)
    #[serde(default = "default_chunk_wire_len")]
    pub chunk_wire_len: usize,
    /// Address advance per full chunk
    #[serde(default = "default_chunk_advance")]
    pub chunk_advance: u32,
    /// Transfer announcement length byte for a full chunk
    #[serde(default = "default_chunk_subfunction")]
    pub chunk_subfunction: u8,
    /// Transfer announcement length byte for the final transfer
    #[serde(default = "default_finalize_subfunction")]
    pub finalize_subfunction: u8,
    /// Address advance for the final transfer
    #[serde(default = "default_trailer_len")]
    pub trailer_len: u32,
    /// Send a tester-present before every n-th chunk
    #[serde(default = "default_keepalive_every")]
    pub keepalive_every: usize,
}

fn default_tx_id() -> u32 {
    0x7E0
}

fn default_rx_id() -> u32 {
    0x7E8
}

fn default_keepalive_id() -> u32 {
    0x101
}

fn default_start_address() -> u32 {
    0x102400
}

fn default_chunk_wire_len() -> usize {
    238
}

fn default_chunk_advance() -> u32 {
    0xEA
}

fn default_chunk_subfunction() -> u8 {
    0xF0
}

fn default_finalize_subfunction() -> u8 {
    0x0A
}

fn default_trailer_len() -> u32 {
    0x06
}

fn default_keepalive_every() -> usize {
    15
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            tx_id: default_tx_id(),
            rx_id: default_rx_id(),
            keepalive_id: default_keepalive_id(),
            start_address: default_start_address(),
            chunk_wire_len: default_chunk_wire_len(),
            chunk_advance: default_chunk_advance(),
            chunk_subfunction: default_chunk_subfunction(),
            finalize_subfunction: default_finalize_subfunction(),
            trailer_len: default_trailer_len(),
            keepalive_every: default_keepalive_every(),
        }
    }
}

impl BootloaderConfig {
    /// Frames streamed per full chunk
    pub fn frames_per_chunk(&self) -> usize {
        self.chunk_wire_len / FRAME_PAYLOAD
    }

    /// Image bytes the final transfer announcement accounts for
    pub fn finalize_capacity(&self) -> usize {
        usize::from(self.finalize_subfunction).saturating_sub(TRANSFER_HEADER_LEN)
    }

    /// Frames streamed for the final transfer, at least one
    pub fn finalize_frames(&self) -> usize {
        self.finalize_capacity().div_ceil(FRAME_PAYLOAD).max(1)
    }

    /// Reject parameters the upload engine cannot work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_wire_len == 0 || self.chunk_wire_len % FRAME_PAYLOAD != 0 {
            return Err(Error::Config(format!(
                "bootloader.chunk_wire_len must be a non-zero multiple of {}, got {}",
                FRAME_PAYLOAD, self.chunk_wire_len
            )));
        }
        if self.keepalive_every == 0 {
            return Err(Error::Config(
                "bootloader.keepalive_every must be at least 1".to_string(),
            ));
        }
        if usize::from(self.finalize_subfunction) < TRANSFER_HEADER_LEN {
            return Err(Error::Config(format!(
                "bootloader.finalize_subfunction must cover the {}-byte transfer header, got 0x{:02X}",
                TRANSFER_HEADER_LEN, self.finalize_subfunction
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Bounded retry for readiness polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Pause between attempts (ms)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    10
}

fn default_delay_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}
