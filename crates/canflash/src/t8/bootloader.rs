//! Bootloader upload engine
//!
//! ```text
//!   Idle ──► Handshake ──► Uploading ──► Finalizing ──► Done
//!               │              │              │
//!               └──────────────┴──────────────┴──────► Failed
//! ```
//!
//! The image is streamed in chunks. Each chunk is announced with a
//! TransferData first frame, then sent as consecutive frames carrying a
//! rolling sequence byte and seven image bytes. Only the last frame of a
//! chunk asks for a reply. The bytes left after the last full chunk go out
//! in one final transfer and must fit what its announcement covers.

use std::fmt;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{T8Client, T8Error};
use crate::config::FRAME_PAYLOAD;
use crate::frame::{CanFrame, FrameKind};
use crate::gmlan::{check_err, service_id, GmlanError, SequenceCounter};
use crate::transport::TransportError;

/// Upload engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Handshake,
    Uploading,
    Finalizing,
    Done,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Done | UploadState::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Idle => "idle",
            UploadState::Handshake => "handshake",
            UploadState::Uploading => "uploading",
            UploadState::Finalizing => "finalizing",
            UploadState::Done => "done",
            UploadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Update delivered to a [`ProgressSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Number of full chunks about to be sent
    Total(usize),
    /// Chunks completed so far
    Chunk(usize),
    /// Human readable status line
    Message(String),
}

impl ProgressUpdate {
    /// Numeric form: minus the total for [`ProgressUpdate::Total`], the
    /// counter for [`ProgressUpdate::Chunk`]
    pub fn as_counter(&self) -> Option<i64> {
        match self {
            ProgressUpdate::Total(total) => Some(-(*total as i64)),
            ProgressUpdate::Chunk(done) => Some(*done as i64),
            ProgressUpdate::Message(_) => None,
        }
    }
}

/// Receives upload progress
pub trait ProgressSink: Send {
    fn update(&mut self, update: ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressUpdate) + Send,
{
    fn update(&mut self, update: ProgressUpdate) {
        self(update)
    }
}

/// Sink that discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _update: ProgressUpdate) {}
}

/// Summary of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Full chunks sent, excluding the final transfer
    pub chunks: usize,
    /// Running address after the final transfer
    pub end_address: u32,
    /// Payload bytes put on the wire, including zero padding
    pub bytes_sent: usize,
    pub elapsed: Duration,
}

/// Per-upload bookkeeping
struct TransferSession<'a> {
    image: &'a [u8],
    /// Next image byte to send
    offset: usize,
    address: u32,
    chunk: usize,
    sequence: SequenceCounter,
    state: UploadState,
}

impl<'a> TransferSession<'a> {
    fn new(image: &'a [u8], address: u32) -> Self {
        Self {
            image,
            offset: 0,
            address,
            chunk: 0,
            sequence: SequenceCounter::new(),
            state: UploadState::Idle,
        }
    }

    fn enter(&mut self, state: UploadState) {
        debug!(from = %self.state, to = %state, "Upload state");
        self.state = state;
    }

    /// Next consecutive frame payload; bytes past the image end are zero
    fn next_payload(&mut self) -> [u8; 8] {
        let mut payload = [0u8; 8];
        payload[0] = self.sequence.advance();
        let end = (self.offset + FRAME_PAYLOAD).min(self.image.len());
        if self.offset < end {
            let bytes = &self.image[self.offset..end];
            payload[1..1 + bytes.len()].copy_from_slice(bytes);
        }
        self.offset += FRAME_PAYLOAD;
        payload
    }

    fn fail(&mut self, source: GmlanError) -> T8Error {
        let state = self.state;
        self.enter(UploadState::Failed);
        T8Error::Upload { state, source }
    }
}

impl T8Client {
    /// Upload `image` to the configured start address
    ///
    /// Any failure aborts the whole upload and leaves the ECU in whatever
    /// state it reached. The failure is also reported to `progress`.
    /// Images the final transfer cannot carry are rejected before anything
    /// is sent.
    pub async fn upload_bootloader(
        &self,
        cancel: &CancellationToken,
        image: &[u8],
        progress: &mut dyn ProgressSink,
    ) -> Result<UploadReport, T8Error> {
        if image.is_empty() {
            return Err(T8Error::EmptyImage);
        }
        self.config
            .validate()
            .map_err(|e| T8Error::InvalidConfig(e.to_string()))?;
        let tail = image.len() % self.config.chunk_wire_len;
        let capacity = self.config.finalize_capacity();
        if tail > capacity {
            return Err(T8Error::TailTooLong { tail, capacity });
        }

        let mut session = TransferSession::new(image, self.config.start_address);
        match self.run_upload(cancel, &mut session, progress).await {
            Ok(report) => Ok(report),
            Err(source) => {
                let err = session.fail(source);
                warn!(error = %err, chunk = session.chunk, "Bootloader upload failed");
                progress.update(ProgressUpdate::Message(format!("Upload failed: {}", err)));
                Err(err)
            }
        }
    }

    /// Upload `image`, then jump into it
    pub async fn upload_and_start(
        &self,
        cancel: &CancellationToken,
        image: &[u8],
        progress: &mut dyn ProgressSink,
    ) -> Result<UploadReport, T8Error> {
        let report = self.upload_bootloader(cancel, image, progress).await?;
        self.start_bootloader(cancel, self.config.start_address).await?;
        Ok(report)
    }

    async fn run_upload(
        &self,
        cancel: &CancellationToken,
        session: &mut TransferSession<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<UploadReport, GmlanError> {
        let cfg = &self.config;
        let start = Instant::now();

        session.enter(UploadState::Handshake);
        self.gmlan
            .request_download(cancel, cfg.tx_id, cfg.rx_id, false)
            .await?;

        let chunks = session.image.len() / cfg.chunk_wire_len;
        progress.update(ProgressUpdate::Total(chunks));
        progress.update(ProgressUpdate::Chunk(0));
        progress.update(ProgressUpdate::Message("Uploading bootloader".to_string()));
        info!(
            bytes = session.image.len(),
            chunks,
            address = format!("0x{:06X}", session.address),
            "Uploading bootloader"
        );

        session.enter(UploadState::Uploading);
        let frames_per_chunk = cfg.frames_per_chunk();
        for index in 0..chunks {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled.into());
            }
            if index > 0 && index % cfg.keepalive_every == 0 {
                self.gmlan.tester_present_no_response_allowed().await?;
            }

            self.send_chunk(cancel, session, cfg.chunk_subfunction, frames_per_chunk)
                .await?;
            session.address = session.address.wrapping_add(cfg.chunk_advance);
            session.chunk = index + 1;
            progress.update(ProgressUpdate::Chunk(session.chunk));
        }

        session.enter(UploadState::Finalizing);
        self.send_chunk(
            cancel,
            session,
            cfg.finalize_subfunction,
            cfg.finalize_frames(),
        )
        .await?;
        self.gmlan.tester_present_no_response_allowed().await?;
        session.address = session.address.wrapping_add(cfg.trailer_len);

        session.enter(UploadState::Done);
        let elapsed = start.elapsed();
        progress.update(ProgressUpdate::Message(format!("Done, took: {:?}", elapsed)));
        info!(
            chunks,
            end_address = format!("0x{:06X}", session.address),
            ?elapsed,
            "Bootloader uploaded"
        );

        Ok(UploadReport {
            chunks,
            end_address: session.address,
            bytes_sent: session.offset,
            elapsed,
        })
    }

    /// Announce one transfer and stream `frames` consecutive frames
    async fn send_chunk(
        &self,
        cancel: &CancellationToken,
        session: &mut TransferSession<'_>,
        length: u8,
        frames: usize,
    ) -> Result<(), GmlanError> {
        let cfg = &self.config;
        let client = self.gmlan.client();

        self.gmlan
            .data_transfer(cancel, length, session.address, cfg.tx_id, cfg.rx_id)
            .await?;

        // Registered before the last frame goes out so the ack cannot be missed
        let ack = client.expect(cfg.rx_id)?;
        let sender = client.sender();
        session.sequence.reset();
        for i in 0..frames {
            let kind = if i + 1 == frames {
                FrameKind::ResponseRequired
            } else {
                FrameKind::Outgoing
            };
            let payload = session.next_payload();
            sender
                .send(CanFrame::with_payload(cfg.tx_id, payload, kind)?)
                .await?;
        }

        let reply = ack.wait(cancel, self.gmlan.timeout()).await?;
        check_err(&reply)?;
        if reply.byte(0) != 0x01 || reply.byte(1) != service_id::positive(service_id::TRANSFER_DATA)
        {
            return Err(GmlanError::ProtocolViolation(format!(
                "invalid transfer data response {} at 0x{:06X}",
                reply, session.address
            )));
        }
        Ok(())
    }
}
