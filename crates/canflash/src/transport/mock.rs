//! Mock CAN adapter for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CanAdapter, TransportError};
use crate::config::MockConfig;
use crate::frame::{CanFrame, FrameKind};

/// How long `recv_frame` waits before reporting an empty buffer
const RECV_WINDOW: Duration = Duration::from_millis(20);

/// Scripted ECU: sees every written frame and returns the frames it replies with
pub type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

/// In-memory adapter with a scriptable responder
pub struct MockAdapter {
    config: MockConfig,
    initialized: AtomicBool,
    closed: AtomicBool,
    incoming_tx: mpsc::UnboundedSender<CanFrame>,
    incoming_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanFrame>>,
    responder: Mutex<Option<Responder>>,
    /// Every frame written through this adapter, in write order
    sent: Mutex<Vec<CanFrame>>,
    fail_next_send: Mutex<Option<String>>,
}

impl MockAdapter {
    pub fn new(config: &MockConfig) -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            config: config.clone(),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            responder: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_next_send: Mutex::new(None),
        }
    }

    /// Mock adapter answering like a Trionic 8 in bootloader mode
    pub fn with_t8_responder(config: &MockConfig) -> Self {
        let adapter = Self::new(config);
        adapter.set_boxed_responder(t8_responder());
        adapter
    }

    /// Replace the scripted ECU
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&CanFrame) -> Vec<CanFrame> + Send + 'static,
    {
        self.set_boxed_responder(Box::new(responder));
    }

    fn set_boxed_responder(&self, responder: Responder) {
        *self.responder.lock() = Some(responder);
    }

    /// Inject an incoming frame (simulates unsolicited bus traffic)
    pub fn inject(&self, id: u32, data: &[u8]) -> Result<(), TransportError> {
        let frame = CanFrame::new(id, data, FrameKind::Incoming)?;
        self.incoming_tx
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    /// Make the next write fail with an adapter I/O error
    pub fn fail_next_send(&self, reason: &str) {
        *self.fail_next_send.lock() = Some(reason.to_string());
    }

    /// Frames written so far
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.sent.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CanAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn init(&self) -> Result<(), TransportError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_frame(&self, frame: &CanFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Some(reason) = self.fail_next_send.lock().take() {
            return Err(TransportError::AdapterIo(reason));
        }

        // Simulate latency
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        tracing::trace!(%frame, "Mock adapter: sent frame");
        self.sent.lock().push(frame.clone());

        let replies = match self.responder.lock().as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        for reply in replies {
            let incoming = CanFrame::new(reply.id(), reply.data(), FrameKind::Incoming)?;
            let _ = self.incoming_tx.send(incoming);
        }
        Ok(())
    }

    async fn recv_frame(&self) -> Result<CanFrame, TransportError> {
        let mut rx = self.incoming_rx.lock().await;
        match tokio::time::timeout(RECV_WINDOW, rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::BufferEmpty),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Response id used by the simulated ECU
const ECU_RESPONSE_ID: u32 = 0x7E8;

/// Checksum block the simulated ECU reports for MD5 demands
pub const MOCK_MD5: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
];

fn reply(data: &[u8]) -> Vec<CanFrame> {
    CanFrame::new(ECU_RESPONSE_ID, data, FrameKind::Incoming)
        .map(|frame| vec![frame])
        .unwrap_or_default()
}

/// Simulated Trionic 8 running the Legion bootloader
///
/// Understands request-download, the transfer-data first frame and chunk
/// bursts, start-bootloader, the Legion command set and the 16-byte
/// read-by-local-identifier used for MD5 results. Everything else is ignored.
pub fn t8_responder() -> Responder {
    let mut pending_consecutive: Vec<CanFrame> = Vec::new();

    Box::new(move |frame: &CanFrame| {
        let d = frame.data();
        if frame.id() != 0x7E0 || d.is_empty() {
            return Vec::new();
        }

        match d {
            // Flow control for a pending multi-frame reply
            [0x30, ..] => std::mem::take(&mut pending_consecutive),
            // Consecutive frames; only the last one of a burst is answered
            [seq, ..] if (0x20..=0x2F).contains(seq) => {
                if frame.kind() == FrameKind::ResponseRequired {
                    reply(&[0x01, 0x76])
                } else {
                    Vec::new()
                }
            }
            // RequestDownload
            [0x05, 0x34, ..] => reply(&[0x01, 0x74]),
            // Start bootloader (transfer data, execute)
            [0x06, 0x36, 0x80, ..] => reply(&[0x01, 0x76]),
            // Transfer data first frame: continue to send
            [0x10, _, 0x36, ..] => reply(&[0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            [0xEF, 0xBE, ..] => reply(&[0xDE, 0xAD, 0xF0, 0x0F, 0x00, 0x00, 0x00, 0x00]),
            [0x01, 0x20, ..] => reply(&[0x01, 0x60]),
            [0x02, 0xA5, command, ..] => reply(&[0x03, 0xE5, *command, 0x01]),
            [0x06, 0x21, id, ..] => {
                let mut first = vec![0x10, 0x12, 0x61, *id];
                first.extend_from_slice(&MOCK_MD5[..4]);
                let mut second = vec![0x21];
                second.extend_from_slice(&MOCK_MD5[4..11]);
                let mut third = vec![0x22];
                third.extend_from_slice(&MOCK_MD5[11..]);
                third.extend_from_slice(&[0x00, 0x00]);
                pending_consecutive = [second, third]
                    .iter()
                    .flat_map(|data| reply(data))
                    .collect();
                reply(&first)
            }
            _ => Vec::new(),
        }
    })
}
