//! CAN frame model

use std::fmt;

use crate::transport::TransportError;

/// Largest identifier in the 11-bit (standard) address space
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest identifier in the 29-bit (extended) address space
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Classic CAN payload limit
pub const MAX_PAYLOAD: usize = 8;

/// Direction tag carried by every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Received from the bus
    Incoming,
    /// Transmitted, no reply expected
    Outgoing,
    /// Transmitted, the sender will wait for a reply
    ResponseRequired,
}

impl FrameKind {
    pub fn is_outgoing(self) -> bool {
        !matches!(self, FrameKind::Incoming)
    }
}

/// An immutable CAN frame: identifier, up to 8 payload bytes and a direction tag
#[derive(Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    len: u8,
    data: [u8; MAX_PAYLOAD],
    kind: FrameKind,
}

impl CanFrame {
    /// Build a frame, rejecting identifiers above 29 bits and payloads above 8 bytes
    pub fn new(id: u32, data: &[u8], kind: FrameKind) -> Result<Self, TransportError> {
        if id > MAX_EXTENDED_ID {
            return Err(TransportError::InvalidFrame(format!(
                "identifier 0x{:X} exceeds 29 bits",
                id
            )));
        }
        if data.len() > MAX_PAYLOAD {
            return Err(TransportError::InvalidFrame(format!(
                "payload of {} bytes exceeds {} bytes",
                data.len(),
                MAX_PAYLOAD
            )));
        }

        let mut buf = [0u8; MAX_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            len: data.len() as u8,
            data: buf,
            kind,
        })
    }

    /// Frame from a full 8-byte payload; only the identifier can be out of range
    pub fn with_payload(
        id: u32,
        data: [u8; MAX_PAYLOAD],
        kind: FrameKind,
    ) -> Result<Self, TransportError> {
        Self::new(id, &data, kind)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the identifier needs the 29-bit address space
    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    /// Byte at `index`, or 0 past the end of the payload
    pub fn byte(&self, index: usize) -> u8 {
        self.data().get(index).copied().unwrap_or(0)
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame({})", self)
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.kind {
            FrameKind::Incoming => "<<",
            FrameKind::Outgoing => ">>",
            FrameKind::ResponseRequired => ">?",
        };
        write!(
            f,
            "{} 0x{:03X} [{}] {}",
            dir,
            self.id,
            self.len,
            hex::encode_upper(self.data())
        )
    }
}
