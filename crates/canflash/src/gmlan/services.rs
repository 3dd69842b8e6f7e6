//! GMLAN service layer for diagnostic communication

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{
    check_err, pci, service_id, transfer_sub_function, GmlanError, SequenceCounter, ALL_NODES,
};
use crate::client::Client;
use crate::frame::{CanFrame, FrameKind};

/// Default identifier for functional tester-present broadcasts
pub const DEFAULT_KEEPALIVE_ID: u32 = 0x101;

/// dataFormatIdentifier for compressed downloads
const DFI_COMPRESSED: u8 = 0x10;
const DFI_UNCOMPRESSED: u8 = 0x00;

/// GMLAN service layer over a shared [`Client`]
#[derive(Clone)]
pub struct Gmlan {
    client: Arc<Client>,
    timeout: Duration,
    keepalive_id: u32,
}

impl Gmlan {
    pub fn new(client: Arc<Client>) -> Self {
        let timeout = client.default_timeout();
        Self {
            client,
            timeout,
            keepalive_id: DEFAULT_KEEPALIVE_ID,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_keepalive_id(mut self, id: u32) -> Self {
        self.keepalive_id = id;
        self
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a single-frame request and wait for the reply on `rx_id`
    ///
    /// Negative responses are mapped to [`GmlanError::NegativeResponse`].
    pub async fn request(
        &self,
        cancel: &CancellationToken,
        tx_id: u32,
        rx_id: u32,
        payload: [u8; 8],
    ) -> Result<CanFrame, GmlanError> {
        let frame = CanFrame::with_payload(tx_id, payload, FrameKind::ResponseRequired)?;
        let reply = self
            .client
            .send_and_poll(cancel, frame, self.timeout, rx_id)
            .await?;
        check_err(&reply)?;
        Ok(reply)
    }

    // ========================================================================
    // RequestDownload (0x34)
    // ========================================================================

    /// Ask the ECU to accept a download
    pub async fn request_download(
        &self,
        cancel: &CancellationToken,
        tx_id: u32,
        rx_id: u32,
        compressed: bool,
    ) -> Result<(), GmlanError> {
        let dfi = if compressed {
            DFI_COMPRESSED
        } else {
            DFI_UNCOMPRESSED
        };
        let payload = [0x05, service_id::REQUEST_DOWNLOAD, dfi, 0, 0, 0, 0, 0];

        let reply = self.request(cancel, tx_id, rx_id, payload).await?;
        expect_positive(&reply, service_id::REQUEST_DOWNLOAD)?;
        debug!(tx = format!("0x{:03X}", tx_id), compressed, "Download accepted");
        Ok(())
    }

    // ========================================================================
    // TransferData (0x36)
    // ========================================================================

    /// Announce a multi-frame TransferData of `length` bytes to `address`
    ///
    /// `length` is the ISO-TP first-frame length byte (0xF0 for a full data
    /// chunk). Succeeds once the ECU answers with a flow-control frame; the
    /// caller then streams the consecutive frames.
    pub async fn data_transfer(
        &self,
        cancel: &CancellationToken,
        length: u8,
        address: u32,
        tx_id: u32,
        rx_id: u32,
    ) -> Result<(), GmlanError> {
        let a = address.to_be_bytes();
        let payload = [
            pci::FIRST_FRAME,
            length,
            service_id::TRANSFER_DATA,
            transfer_sub_function::DOWNLOAD,
            a[0],
            a[1],
            a[2],
            a[3],
        ];

        let reply = self.request(cancel, tx_id, rx_id, payload).await?;
        if reply.byte(0) != pci::FLOW_CONTROL {
            return Err(GmlanError::ProtocolViolation(format!(
                "expected flow control for transfer to 0x{:06X}, got {}",
                address, reply
            )));
        }
        trace!(address = format!("0x{:06X}", address), length, "Transfer announced");
        Ok(())
    }

    /// Single-frame TransferData with the execute sub-function
    ///
    /// Tells the ECU to jump to `address`. Any reply other than a negative
    /// response is accepted.
    pub async fn transfer_data_execute(
        &self,
        cancel: &CancellationToken,
        address: u32,
        tx_id: u32,
        rx_id: u32,
    ) -> Result<(), GmlanError> {
        let a = address.to_be_bytes();
        let payload = [
            0x06,
            service_id::TRANSFER_DATA,
            transfer_sub_function::DOWNLOAD_AND_EXECUTE,
            a[0],
            a[1],
            a[2],
            a[3],
            0x00,
        ];

        self.request(cancel, tx_id, rx_id, payload).await?;
        Ok(())
    }

    // ========================================================================
    // TesterPresent (0x3E)
    // ========================================================================

    /// Broadcast a tester-present that no ECU answers
    ///
    /// Only waits for room in the outbound queue, never for a reply.
    pub async fn tester_present_no_response_allowed(&self) -> Result<(), GmlanError> {
        let frame = CanFrame::new(
            self.keepalive_id,
            &[ALL_NODES, 0x01, service_id::TESTER_PRESENT],
            FrameKind::Outgoing,
        )?;
        self.client.send(frame).await?;
        trace!("Tester present sent");
        Ok(())
    }

    // ========================================================================
    // ReadDataByLocalIdentifier (0x21)
    // ========================================================================

    /// Read `len` bytes of local identifier `id` at `address`
    ///
    /// Handles both single-frame and first/consecutive-frame replies.
    pub async fn read_data_by_local_identifier(
        &self,
        cancel: &CancellationToken,
        tx_id: u32,
        rx_id: u32,
        id: u8,
        address: u32,
        len: usize,
    ) -> Result<Vec<u8>, GmlanError> {
        let a = address.to_be_bytes();
        let payload = [
            0x06,
            service_id::READ_DATA_BY_LOCAL_ID,
            id,
            a[0],
            a[1],
            a[2],
            a[3],
            0x00,
        ];
        let positive = service_id::positive(service_id::READ_DATA_BY_LOCAL_ID);

        // Consecutive frames are not claimed by any wait
        let mut frames = self.client.subscribe();
        let first = self.request(cancel, tx_id, rx_id, payload).await?;

        let mut data = match first.byte(0) & 0xF0 {
            pci::SINGLE_FRAME => {
                let n = usize::from(first.byte(0) & 0x0F);
                if n < 2 || first.byte(1) != positive || first.byte(2) != id {
                    return Err(unexpected(&first, "read by local identifier"));
                }
                first
                    .data()
                    .get(3..(1 + n).min(first.len()))
                    .unwrap_or_default()
                    .to_vec()
            }
            pci::FIRST_FRAME => {
                let total = (usize::from(first.byte(0) & 0x0F) << 8) | usize::from(first.byte(1));
                if first.len() < 4
                    || total < 2
                    || first.byte(2) != positive
                    || first.byte(3) != id
                {
                    return Err(unexpected(&first, "read by local identifier"));
                }
                let wanted = total - 2;
                let mut data = Vec::with_capacity(wanted);
                data.extend_from_slice(first.data().get(4..).unwrap_or_default());

                let flow = CanFrame::new(tx_id, &[pci::FLOW_CONTROL, 0, 0], FrameKind::Outgoing)?;
                self.client.send(flow).await?;

                let mut sequence = SequenceCounter::new();
                while data.len() < wanted {
                    let next = frames.next_matching(cancel, self.timeout, rx_id).await?;
                    let expected = sequence.advance();
                    if next.byte(0) != expected {
                        return Err(GmlanError::ProtocolViolation(format!(
                            "expected consecutive frame 0x{:02X}, got {}",
                            expected, next
                        )));
                    }
                    let take = (wanted - data.len()).min(next.len().saturating_sub(1));
                    data.extend_from_slice(&next.data()[1..1 + take]);
                }
                data.truncate(wanted);
                data
            }
            _ => return Err(unexpected(&first, "read by local identifier")),
        };

        if data.len() < len {
            return Err(GmlanError::ProtocolViolation(format!(
                "local identifier 0x{:02X} returned {} bytes, wanted {}",
                id,
                data.len(),
                len
            )));
        }
        data.truncate(len);
        debug!(id = format!("0x{:02X}", id), data = %hex::encode(&data), "Read local identifier");
        Ok(data)
    }
}

/// Accept `[0x01, sid + 0x40]` as the only positive reply
fn expect_positive(reply: &CanFrame, service: u8) -> Result<(), GmlanError> {
    if reply.byte(0) == 0x01 && reply.byte(1) == service_id::positive(service) {
        Ok(())
    } else {
        Err(GmlanError::ProtocolViolation(format!(
            "expected positive response 0x{:02X}, got {}",
            service_id::positive(service),
            reply
        )))
    }
}

fn unexpected(reply: &CanFrame, what: &str) -> GmlanError {
    GmlanError::ProtocolViolation(format!("unexpected {} reply {}", what, reply))
}
