//! Transport layer errors

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Timeout: no frame with id 0x{id:03X} within {after:?}")]
    Timeout { id: u32, after: Duration },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Adapter I/O error: {0}")]
    AdapterIo(String),

    /// Nothing to read yet; only ever seen by the inbound pump
    #[error("Adapter receive buffer empty")]
    BufferEmpty,

    #[error("Bus closed")]
    Closed,

    #[error("A wait for id 0x{0:03X} is already in progress")]
    WaitInProgress(u32),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Adapter not supported: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Timeouts may clear up on a fresh attempt; everything else will not
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}
