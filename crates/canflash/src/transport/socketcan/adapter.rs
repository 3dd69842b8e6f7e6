//! Raw SocketCAN adapter

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, StandardId,
};

use crate::config::SocketCanConfig;
use crate::frame::{CanFrame, FrameKind, MAX_STANDARD_ID};
use crate::transport::{CanAdapter, TransportError};

/// Idle wait between non-blocking reads that found nothing
const READ_IDLE: Duration = Duration::from_millis(1);
/// Number of idle polls folded into one `recv_frame` call
const READ_POLLS: u32 = 50;
/// Attempts to push a frame into a full kernel TX queue
const WRITE_ATTEMPTS: u32 = 20;

/// SocketCAN adapter on a raw CAN socket
pub struct SocketCanAdapter {
    config: SocketCanConfig,
    socket: RwLock<Option<CanSocket>>,
}

impl SocketCanAdapter {
    pub fn new(config: &SocketCanConfig) -> Result<Self, TransportError> {
        if config.interface.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "SocketCAN interface name is empty".to_string(),
            ));
        }
        Ok(Self {
            config: config.clone(),
            socket: RwLock::new(None),
        })
    }

    fn open_socket(&self) -> Result<CanSocket, TransportError> {
        let socket = CanSocket::open(&self.config.interface).map_err(|e| {
            TransportError::AdapterIo(format!(
                "Failed to open raw CAN socket on {}: {}",
                self.config.interface, e
            ))
        })?;

        // Set socket to non-blocking for async operation
        socket.set_nonblocking(true).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set non-blocking: {}", e))
        })?;

        // Drain any stale frames left over from a previous session
        while let Ok(frame) = socket.read_frame() {
            tracing::debug!(id = format!("0x{:03X}", frame.raw_id()), "Drained stale frame");
        }

        Ok(socket)
    }

    fn to_raw(frame: &CanFrame) -> Result<RawFrame, TransportError> {
        let id: Id = if frame.id() <= MAX_STANDARD_ID {
            StandardId::new(frame.id() as u16)
                .map(Id::Standard)
                .ok_or_else(|| invalid_id(frame.id()))?
        } else {
            ExtendedId::new(frame.id())
                .map(Id::Extended)
                .ok_or_else(|| invalid_id(frame.id()))?
        };
        RawFrame::new(id, frame.data())
            .ok_or_else(|| TransportError::InvalidFrame(format!("Cannot encode {}", frame)))
    }
}

fn invalid_id(id: u32) -> TransportError {
    TransportError::InvalidFrame(format!("Invalid CAN ID: 0x{:X}", id))
}

#[async_trait]
impl CanAdapter for SocketCanAdapter {
    fn name(&self) -> &str {
        &self.config.interface
    }

    async fn init(&self) -> Result<(), TransportError> {
        let socket = self.open_socket()?;
        *self.socket.write() = Some(socket);
        tracing::info!(
            interface = %self.config.interface,
            bitrate = self.config.bitrate,
            "SocketCAN adapter opened"
        );
        Ok(())
    }

    async fn send_frame(&self, frame: &CanFrame) -> Result<(), TransportError> {
        let raw = Self::to_raw(frame)?;

        for _ in 0..WRITE_ATTEMPTS {
            let result = {
                let guard = self.socket.read();
                let socket = guard.as_ref().ok_or(TransportError::Closed)?;
                socket.write_frame(&raw)
            };
            match result {
                Ok(()) => return Ok(()),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // Kernel TX queue full, give the bus a moment
                    tokio::time::sleep(READ_IDLE).await;
                }
                Err(e) => return Err(TransportError::AdapterIo(format!("write: {}", e))),
            }
        }
        Err(TransportError::AdapterIo(
            "write: TX queue stayed full".to_string(),
        ))
    }

    async fn recv_frame(&self) -> Result<CanFrame, TransportError> {
        for _ in 0..READ_POLLS {
            let result = {
                let guard = self.socket.read();
                let socket = guard.as_ref().ok_or(TransportError::Closed)?;
                socket.read_frame()
            };
            match result {
                Ok(raw) => {
                    if raw.is_error_frame() {
                        return Err(TransportError::AdapterIo(format!(
                            "error frame 0x{:08X}",
                            raw.raw_id()
                        )));
                    }
                    return CanFrame::new(raw.raw_id(), raw.data(), FrameKind::Incoming);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(READ_IDLE).await;
                }
                Err(e) => return Err(TransportError::AdapterIo(format!("read: {}", e))),
            }
        }
        Err(TransportError::BufferEmpty)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the socket closes the file descriptor
        self.socket.write().take();
        tracing::debug!(interface = %self.config.interface, "SocketCAN adapter closed");
        Ok(())
    }
}
