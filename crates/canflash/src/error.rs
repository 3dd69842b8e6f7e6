//! Crate-level errors

use thiserror::Error;

use crate::gmlan::{GmlanError, NegativeResponseCode};
use crate::t8::T8Error;
use crate::transport::TransportError;

/// Any error the library can return
#[derive(Debug, Error)]
pub enum Error {
    /// Adapter or correlation failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Diagnostic service failure
    #[error(transparent)]
    Gmlan(#[from] GmlanError),

    /// Bootloader or vendor command failure
    #[error(transparent)]
    T8(#[from] T8Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Negative response code carried anywhere in the error chain
    pub fn nrc(&self) -> Option<NegativeResponseCode> {
        match self {
            Error::Gmlan(e) => e.nrc(),
            Error::T8(e) => e.nrc(),
            Error::Transport(_) | Error::Config(_) => None,
        }
    }
}
