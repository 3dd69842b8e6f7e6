//! CAN adapter trait

use async_trait::async_trait;

use super::TransportError;
use crate::frame::CanFrame;

/// Hardware-facing side of a bus: moves raw frames to and from the wire
///
/// The [`Client`](crate::client::Client) owns an adapter for its whole lifetime
/// and is the only caller of these methods. `send_frame` and `recv_frame` are
/// driven from two independent tasks, so implementations must tolerate being
/// called concurrently through a shared reference.
#[async_trait]
pub trait CanAdapter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Open the underlying device
    async fn init(&self) -> Result<(), TransportError>;

    /// Write one frame to the bus
    async fn send_frame(&self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Read one frame from the bus
    ///
    /// Returns [`TransportError::BufferEmpty`] when nothing arrived within the
    /// adapter's own read window. Callers treat that as an idle tick, so an
    /// implementation should not block much longer than ~100 ms per call.
    /// Returned frames are tagged [`FrameKind::Incoming`](crate::frame::FrameKind::Incoming).
    async fn recv_frame(&self) -> Result<CanFrame, TransportError>;

    /// Release the underlying device
    async fn close(&self) -> Result<(), TransportError>;
}
