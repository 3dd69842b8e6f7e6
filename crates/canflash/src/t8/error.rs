//! Trionic 8 bootloader errors

use thiserror::Error;

use super::{LegionCommand, UploadState};
use crate::gmlan::{GmlanError, NegativeResponseCode};
use crate::transport::TransportError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum T8Error {
    /// Fatal upload error, tagged with the engine state it happened in
    #[error("Upload failed during {state}: {source}")]
    Upload {
        state: UploadState,
        source: GmlanError,
    },

    #[error("{command} not ready after {attempts} attempt(s)")]
    NotReady {
        command: LegionCommand,
        attempts: u32,
    },

    /// Vendor command answered with an unexpected status
    #[error("{command}: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },

    #[error("Image is empty")]
    EmptyImage,

    /// The bytes after the last full chunk exceed what the final
    /// transfer announces
    #[error("Image tail of {tail} bytes does not fit the final transfer ({capacity} bytes)")]
    TailTooLong { tail: usize, capacity: usize },

    #[error("{0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Gmlan(#[from] GmlanError),
}

impl T8Error {
    pub fn nrc(&self) -> Option<NegativeResponseCode> {
        match self {
            T8Error::Upload { source, .. } => source.nrc(),
            T8Error::Gmlan(e) => e.nrc(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            T8Error::Gmlan(GmlanError::Transport(TransportError::Cancelled))
                | T8Error::Upload {
                    source: GmlanError::Transport(TransportError::Cancelled),
                    ..
                }
        )
    }
}

impl From<TransportError> for T8Error {
    fn from(e: TransportError) -> Self {
        T8Error::Gmlan(e.into())
    }
}
