//! GMLAN diagnostic service layer
//!
//! This module encodes the small set of GMLAN services needed to negotiate a
//! download, announce transfers and keep a session alive, on top of raw
//! single CAN frames (the ISO-TP framing is done by hand).

mod error;
mod nrc;
mod services;

pub use error::GmlanError;
pub use nrc::NegativeResponseCode;
pub use services::{Gmlan, DEFAULT_KEEPALIVE_ID};

use crate::frame::CanFrame;

/// GMLAN service ID constants
pub mod service_id {
    pub const READ_DATA_BY_LOCAL_ID: u8 = 0x21;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// Positive response service id for a request service id
    pub const fn positive(service_id: u8) -> u8 {
        service_id + 0x40
    }
}

/// ISO-TP protocol control information (high nibble of byte 0)
pub mod pci {
    pub const SINGLE_FRAME: u8 = 0x00;
    pub const FIRST_FRAME: u8 = 0x10;
    pub const CONSECUTIVE_FRAME: u8 = 0x20;
    pub const FLOW_CONTROL: u8 = 0x30;
}

/// TransferData (0x36) sub-functions
pub mod transfer_sub_function {
    /// Download only
    pub const DOWNLOAD: u8 = 0x00;
    /// Download and execute from the given address
    pub const DOWNLOAD_AND_EXECUTE: u8 = 0x80;
}

/// Extended address byte for GMLAN functional (all nodes) requests
pub const ALL_NODES: u8 = 0xFE;

/// Inspect a reply for a negative response
///
/// Accepts the bare form `[0x7F, sid, nrc]` and the ISO-TP single-frame
/// form `[len, 0x7F, sid, nrc]` with `len` in 3..=7. Anything else, such as
/// a consecutive frame whose data happens to hold 0x7F, is not an error here.
pub fn check_err(frame: &CanFrame) -> Result<(), GmlanError> {
    let (service_id, nrc) = match frame.data() {
        [service_id::NEGATIVE_RESPONSE, sid, nrc, ..] => (*sid, *nrc),
        [0x03..=0x07, service_id::NEGATIVE_RESPONSE, sid, nrc, ..] => (*sid, *nrc),
        _ => return Ok(()),
    };
    Err(GmlanError::NegativeResponse {
        service_id,
        nrc: NegativeResponseCode::from(nrc),
    })
}

/// Consecutive-frame sequence byte
///
/// Starts at 0x21 and wraps from 0x2F back to 0x20, so the wrap value is
/// only ever produced after a full lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    pub const FIRST: u8 = 0x21;

    pub fn new() -> Self {
        Self { next: Self::FIRST }
    }

    /// Current byte, advancing the counter
    pub fn advance(&mut self) -> u8 {
        let current = self.next;
        self.next = if current >= 0x2F { 0x20 } else { current + 1 };
        current
    }

    pub fn reset(&mut self) {
        self.next = Self::FIRST;
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for SequenceCounter {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        Some(self.advance())
    }
}
