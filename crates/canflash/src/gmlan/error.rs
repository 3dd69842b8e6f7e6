//! GMLAN protocol errors

use thiserror::Error;

use super::NegativeResponseCode;
use crate::transport::TransportError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GmlanError {
    #[error("Negative response: {nrc} (0x{nrc:02X}) for service 0x{service_id:02X}")]
    NegativeResponse {
        service_id: u8,
        nrc: NegativeResponseCode,
    },

    /// A reply arrived but does not carry the expected positive signature
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GmlanError {
    pub fn nrc(&self) -> Option<NegativeResponseCode> {
        match self {
            GmlanError::NegativeResponse { nrc, .. } => Some(*nrc),
            _ => None,
        }
    }

    /// Worth repeating the same request: timeouts and "not ready" NRCs
    pub fn is_retryable(&self) -> bool {
        match self {
            GmlanError::NegativeResponse { nrc, .. } => nrc.is_retryable(),
            GmlanError::Transport(e) => e.is_timeout(),
            GmlanError::ProtocolViolation(_) => false,
        }
    }
}
