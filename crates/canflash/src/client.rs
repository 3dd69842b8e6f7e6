//! Transport/correlator over a CAN adapter
//!
//! A [`Client`] turns the broadcast, asynchronous frame stream of a bus into
//! timeout-bounded request/response exchanges. It owns two background tasks:
//!
//! ```text
//!   callers ──send()──► [outbound queue] ──outbound pump──► adapter.send_frame
//!
//!   adapter.recv_frame ──inbound pump──► dispatch ─┬─► pending wait (by id)
//!                                                  └─► subscribers (unclaimed)
//! ```
//!
//! The pumps never run caller logic, so a stalled receive path cannot hold up
//! transmission and vice versa. At most one wait per response identifier may
//! be outstanding; a second [`Client::expect`] on the same identifier fails
//! with [`TransportError::WaitInProgress`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::frame::{CanFrame, FrameKind};
use crate::transport::{CanAdapter, TransportError};

/// Pause after a hard adapter read error before reading again
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// A frame waiting for the outbound pump
struct Outbound {
    frame: CanFrame,
    /// Write result for frames whose sender is about to wait on a reply
    ack: Option<oneshot::Sender<Result<(), TransportError>>>,
}

/// Outstanding waits keyed by expected response identifier
#[derive(Default)]
struct WaitTable {
    next_token: AtomicU64,
    slots: Mutex<HashMap<u32, (u64, oneshot::Sender<CanFrame>)>>,
}

impl WaitTable {
    fn register(&self, id: u32) -> Result<(u64, oneshot::Receiver<CanFrame>), TransportError> {
        let mut slots = self.slots.lock();
        if let Some((_, tx)) = slots.get(&id) {
            if !tx.is_closed() {
                return Err(TransportError::WaitInProgress(id));
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        slots.insert(id, (token, tx));
        Ok((token, rx))
    }

    /// Hand the frame to the wait registered for its id; returns it if unclaimed
    fn fulfil(&self, frame: CanFrame) -> Option<CanFrame> {
        let slot = self.slots.lock().remove(&frame.id());
        match slot {
            Some((_, tx)) => tx.send(frame).err(),
            None => Some(frame),
        }
    }

    fn release(&self, id: u32, token: u64) {
        let mut slots = self.slots.lock();
        if slots.get(&id).is_some_and(|(t, _)| *t == token) {
            slots.remove(&id);
        }
    }

    fn clear(&self) {
        self.slots.lock().clear();
    }
}

/// Handle to the outbound queue
///
/// Cloneable; used by layers that stream frames without waiting for replies.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Outbound>,
    /// Write failure of a fire-and-forget frame, reported on the next send
    send_error: Arc<Mutex<Option<TransportError>>>,
}

impl FrameSender {
    /// Queue a frame for transmission
    ///
    /// Waits for queue space when the outbound queue is full. Frames tagged
    /// [`FrameKind::ResponseRequired`] also wait for the adapter write so that
    /// its failure is returned here.
    pub async fn send(&self, frame: CanFrame) -> Result<(), TransportError> {
        if frame.kind() == FrameKind::Incoming {
            return Err(TransportError::InvalidFrame(format!(
                "cannot transmit incoming frame {}",
                frame
            )));
        }
        if let Some(err) = self.send_error.lock().take() {
            return Err(err);
        }

        if frame.kind() == FrameKind::ResponseRequired {
            let (ack_tx, ack_rx) = oneshot::channel();
            self.tx
                .send(Outbound {
                    frame,
                    ack: Some(ack_tx),
                })
                .await
                .map_err(|_| TransportError::Closed)?;
            ack_rx.await.map_err(|_| TransportError::Closed)?
        } else {
            self.tx
                .send(Outbound { frame, ack: None })
                .await
                .map_err(|_| TransportError::Closed)
        }
    }
}

/// A registered wait for one response identifier
///
/// Dropping the handle releases the identifier for the next wait.
pub struct PendingResponse {
    id: u32,
    token: u64,
    rx: oneshot::Receiver<CanFrame>,
    table: Arc<WaitTable>,
}

impl PendingResponse {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the matching frame, the timeout or cancellation
    pub async fn wait(
        mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<CanFrame, TransportError> {
        let id = self.id;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(timeout, &mut self.rx) => match result {
                Ok(Ok(frame)) => Ok(frame),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::Timeout { id, after: timeout }),
            },
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.table.release(self.id, self.token);
    }
}

/// Passive view of frames no wait claimed, in arrival order
pub struct FrameSubscription {
    rx: broadcast::Receiver<CanFrame>,
}

impl FrameSubscription {
    /// Next unclaimed frame
    pub async fn recv(&mut self) -> Result<CanFrame, TransportError> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }

    /// Next unclaimed frame with identifier `id`
    pub async fn next_matching(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
        id: u32,
    ) -> Result<CanFrame, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout { id, after: timeout });
            }

            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = tokio::time::timeout(remaining, self.recv()) => match result {
                    Ok(frame) => frame?,
                    Err(_) => return Err(TransportError::Timeout { id, after: timeout }),
                },
            };

            if frame.id() == id {
                return Ok(frame);
            }
            trace!(%frame, expected = format!("0x{:03X}", id), "Ignoring non-matching frame");
        }
    }
}

/// Synchronous request/response access to one CAN bus
pub struct Client {
    adapter: Arc<dyn CanAdapter>,
    config: ClientConfig,
    sender: FrameSender,
    waits: Arc<WaitTable>,
    subscribers: broadcast::Sender<CanFrame>,
    close: CancellationToken,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Initialise the adapter and start both pumps
    pub async fn new(
        adapter: Arc<dyn CanAdapter>,
        config: ClientConfig,
    ) -> Result<Self, TransportError> {
        adapter.init().await?;

        let (tx, rx) = mpsc::channel(config.send_queue_depth.max(1));
        let (subscribers, _) = broadcast::channel(config.subscriber_capacity.max(1));
        let send_error = Arc::new(Mutex::new(None));
        let waits = Arc::new(WaitTable::default());
        let close = CancellationToken::new();

        let outbound = tokio::spawn(outbound_pump(
            adapter.clone(),
            rx,
            send_error.clone(),
            close.clone(),
        ));
        let inbound = tokio::spawn(inbound_pump(
            adapter.clone(),
            waits.clone(),
            subscribers.clone(),
            close.clone(),
        ));

        debug!(adapter = adapter.name(), "CAN client started");

        Ok(Self {
            adapter,
            config,
            sender: FrameSender { tx, send_error },
            waits,
            subscribers,
            close,
            pumps: Mutex::new(vec![outbound, inbound]),
        })
    }

    /// Default timeout for request/response exchanges
    pub fn default_timeout(&self) -> Duration {
        self.config.default_timeout()
    }

    /// Queue a frame for transmission
    pub async fn send(&self, frame: CanFrame) -> Result<(), TransportError> {
        self.sender.send(frame).await
    }

    /// Handle to the outbound queue
    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Passive subscription to frames that no wait claims
    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            rx: self.subscribers.subscribe(),
        }
    }

    /// Register a wait for the next frame with identifier `id`
    ///
    /// Frames arriving after this call are captured even if
    /// [`PendingResponse::wait`] is awaited later.
    pub fn expect(&self, id: u32) -> Result<PendingResponse, TransportError> {
        if self.close.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (token, rx) = self.waits.register(id)?;
        Ok(PendingResponse {
            id,
            token,
            rx,
            table: self.waits.clone(),
        })
    }

    /// Wait for a frame with identifier `id`
    pub async fn poll(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
        id: u32,
    ) -> Result<CanFrame, TransportError> {
        self.expect(id)?.wait(cancel, timeout).await
    }

    /// Send `frame` and wait for the reply with identifier `id`
    ///
    /// The wait is registered before the frame is queued, so a fast reply is
    /// never missed.
    pub async fn send_and_poll(
        &self,
        cancel: &CancellationToken,
        frame: CanFrame,
        timeout: Duration,
        id: u32,
    ) -> Result<CanFrame, TransportError> {
        let pending = self.expect(id)?;
        self.send(frame).await?;
        pending.wait(cancel, timeout).await
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Stop both pumps and release the adapter
    ///
    /// Frames already queued are still written, within the configured grace
    /// period. Outstanding waits fail with [`TransportError::Closed`].
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.close.is_cancelled() {
            return Ok(());
        }
        self.close.cancel();

        let grace = self.config.close_grace();
        let pumps: Vec<_> = self.pumps.lock().drain(..).collect();
        for pump in pumps {
            let abort = pump.abort_handle();
            if tokio::time::timeout(grace, pump).await.is_err() {
                warn!(?grace, "Pump did not stop within grace period, aborting");
                abort.abort();
            }
        }

        self.waits.clear();
        debug!(adapter = self.adapter.name(), "CAN client closed");
        self.adapter.close().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

async fn outbound_pump(
    adapter: Arc<dyn CanAdapter>,
    mut rx: mpsc::Receiver<Outbound>,
    send_error: Arc<Mutex<Option<TransportError>>>,
    close: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = close.cancelled() => {
                // Flush what callers already queued
                rx.close();
                while let Ok(item) = rx.try_recv() {
                    write_frame(adapter.as_ref(), item, &send_error).await;
                }
                break;
            }
        };
        write_frame(adapter.as_ref(), item, &send_error).await;
    }
    debug!("Outbound pump stopped");
}

async fn write_frame(
    adapter: &dyn CanAdapter,
    item: Outbound,
    send_error: &Mutex<Option<TransportError>>,
) {
    let result = adapter.send_frame(&item.frame).await;
    match &result {
        Ok(()) => trace!(frame = %item.frame, "Frame written"),
        Err(e) => warn!(frame = %item.frame, error = %e, "Adapter write failed"),
    }

    match item.ack {
        Some(ack) => {
            let _ = ack.send(result);
        }
        None => {
            if let Err(e) = result {
                *send_error.lock() = Some(e);
            }
        }
    }
}

async fn inbound_pump(
    adapter: Arc<dyn CanAdapter>,
    waits: Arc<WaitTable>,
    subscribers: broadcast::Sender<CanFrame>,
    close: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = close.cancelled() => break,
            result = adapter.recv_frame() => result,
        };

        match result {
            Ok(frame) => {
                trace!(%frame, "Frame received");
                if let Some(unclaimed) = waits.fulfil(frame) {
                    // No receivers is fine
                    let _ = subscribers.send(unclaimed);
                }
            }
            Err(TransportError::BufferEmpty) => continue,
            Err(TransportError::Closed) => {
                debug!(adapter = adapter.name(), "Adapter closed its receive side");
                break;
            }
            Err(e) => {
                warn!(adapter = adapter.name(), error = %e, "Adapter read failed");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
            }
        }
    }
    debug!("Inbound pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use crate::transport::mock::MockAdapter;

    fn frame(id: u32, data: &[u8], kind: FrameKind) -> CanFrame {
        CanFrame::new(id, data, kind).unwrap()
    }

    async fn echo_bus() -> (Arc<MockAdapter>, Client) {
        let adapter = Arc::new(MockAdapter::new(&MockConfig::default()));
        adapter.set_responder(|f| {
            if f.id() == 0x7E0 {
                vec![CanFrame::new(0x7E8, f.data(), FrameKind::Incoming).unwrap()]
            } else {
                Vec::new()
            }
        });
        let client = Client::new(adapter.clone(), ClientConfig::default())
            .await
            .unwrap();
        (adapter, client)
    }

    #[tokio::test]
    async fn test_send_and_poll_returns_matching_frame_once() {
        let (adapter, client) = echo_bus().await;
        let cancel = CancellationToken::new();
        adapter.inject(0x123, &[0xAA]).unwrap();

        let request = frame(0x7E0, &[0x02, 0x10, 0x02], FrameKind::ResponseRequired);
        let response = client
            .send_and_poll(&cancel, request, Duration::from_millis(500), 0x7E8)
            .await
            .unwrap();
        assert_eq!(response.id(), 0x7E8);
        assert_eq!(response.data(), &[0x02, 0x10, 0x02]);
        assert_eq!(response.kind(), FrameKind::Incoming);

        // The frame was consumed by the first wait
        let err = client
            .poll(&cancel, Duration::from_millis(50), 0x7E8)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_poll_times_out_no_earlier_than_deadline() {
        let (_adapter, client) = echo_bus().await;
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(80);

        let start = Instant::now();
        let err = client.poll(&cancel, timeout, 0x7E8).await.unwrap_err();

        assert!(start.elapsed() >= timeout);
        assert_eq!(err, TransportError::Timeout { id: 0x7E8, after: timeout });
    }

    #[tokio::test]
    async fn test_cancellation_is_prompt_and_not_a_timeout() {
        let (_adapter, client) = echo_bus().await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = client
            .poll(&cancel, Duration::from_secs(10), 0x7E8)
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_second_wait_on_same_id_is_rejected() {
        let (_adapter, client) = echo_bus().await;

        let first = client.expect(0x7E8).unwrap();
        let err = client.expect(0x7E8).err().unwrap();
        assert_eq!(err, TransportError::WaitInProgress(0x7E8));

        // Other identifiers are independent
        let _other = client.expect(0x7E9).unwrap();

        drop(first);
        client.expect(0x7E8).unwrap();
    }

    #[tokio::test]
    async fn test_unclaimed_frames_reach_subscribers_in_order() {
        let (adapter, client) = echo_bus().await;
        let cancel = CancellationToken::new();
        let mut sub = client.subscribe();

        for i in 0..5u8 {
            adapter.inject(0x300, &[i]).unwrap();
        }

        for i in 0..5u8 {
            let f = sub
                .next_matching(&cancel, Duration::from_millis(500), 0x300)
                .await
                .unwrap();
            assert_eq!(f.data(), &[i]);
        }
    }

    #[tokio::test]
    async fn test_claimed_frame_is_not_broadcast() {
        let (_adapter, client) = echo_bus().await;
        let cancel = CancellationToken::new();
        let mut sub = client.subscribe();

        client
            .send_and_poll(
                &cancel,
                frame(0x7E0, &[0x01], FrameKind::ResponseRequired),
                Duration::from_millis(500),
                0x7E8,
            )
            .await
            .unwrap();

        let err = sub
            .next_matching(&cancel, Duration::from_millis(50), 0x7E8)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_outbound_frames_are_fifo() {
        let (adapter, client) = echo_bus().await;

        for i in 0..50u8 {
            client
                .send(frame(0x100, &[i], FrameKind::Outgoing))
                .await
                .unwrap();
        }
        // Acknowledged write: everything queued before it has been written too
        client
            .send(frame(0x100, &[0xFF], FrameKind::ResponseRequired))
            .await
            .unwrap();

        let sent: Vec<u8> = adapter.sent_frames().iter().map(|f| f.byte(0)).collect();
        let mut expected: Vec<u8> = (0..50u8).collect();
        expected.push(0xFF);
        assert_eq!(sent, expected);
    }

    #[tokio::test]
    async fn test_write_failure_of_response_required_frame_is_synchronous() {
        let (adapter, client) = echo_bus().await;
        let cancel = CancellationToken::new();
        adapter.fail_next_send("bus off");

        let err = client
            .send_and_poll(
                &cancel,
                frame(0x7E0, &[0x01], FrameKind::ResponseRequired),
                Duration::from_millis(500),
                0x7E8,
            )
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::AdapterIo("bus off".to_string()));

        // The failed exchange released its wait
        client.expect(0x7E8).unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_of_plain_frame_surfaces_on_next_send() {
        let (adapter, client) = echo_bus().await;
        adapter.fail_next_send("arbitration lost");

        client
            .send(frame(0x100, &[0x01], FrameKind::Outgoing))
            .await
            .unwrap();
        // Let the pump attempt the write
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = client
            .send(frame(0x100, &[0x03], FrameKind::Outgoing))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::AdapterIo("arbitration lost".to_string()));
    }

    #[tokio::test]
    async fn test_incoming_frame_cannot_be_sent() {
        let (_adapter, client) = echo_bus().await;
        let err = client
            .send(frame(0x7E0, &[0x01], FrameKind::Incoming))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidFrame(_)));
    }

    #[tokio::test]
    async fn test_close_flushes_queue_and_releases_adapter() {
        let (adapter, client) = echo_bus().await;

        for i in 0..10u8 {
            client
                .send(frame(0x100, &[i], FrameKind::Outgoing))
                .await
                .unwrap();
        }
        client.close().await.unwrap();

        assert_eq!(adapter.sent_frames().len(), 10);
        assert!(adapter.is_closed());
        assert!(client.is_closed());
        assert_eq!(client.expect(0x7E8).err(), Some(TransportError::Closed));
        assert_eq!(
            client
                .send(frame(0x100, &[0x00], FrameKind::Outgoing))
                .await
                .unwrap_err(),
            TransportError::Closed
        );
    }

    #[tokio::test]
    async fn test_send_waits_for_queue_space() {
        let adapter = Arc::new(MockAdapter::new(&MockConfig { latency_ms: 200 }));
        let config = ClientConfig {
            send_queue_depth: 1,
            ..ClientConfig::default()
        };
        let client = Client::new(adapter.clone(), config).await.unwrap();

        // The first frame is taken by the pump, the second fills the queue
        client
            .send(frame(0x7E0, &[0x01], FrameKind::Outgoing))
            .await
            .unwrap();
        client
            .send(frame(0x7E0, &[0x02], FrameKind::Outgoing))
            .await
            .unwrap();

        let third = client.send(frame(0x7E0, &[0x03], FrameKind::Outgoing));
        tokio::pin!(third);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut third)
            .await
            .is_err());
        assert!(adapter.sent_frames().is_empty());

        // Space frees up once the first write lands
        third.await.unwrap();
        assert!(!adapter.sent_frames().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let written: Vec<u8> = adapter.sent_frames().iter().map(|f| f.byte(0)).collect();
        assert_eq!(written, vec![0x01, 0x02, 0x03]);
    }
}
