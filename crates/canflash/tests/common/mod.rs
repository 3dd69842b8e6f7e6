//! Shared helpers for the simulated-ECU integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use canflash::config::MockConfig;
use canflash::transport::mock::{t8_responder, MockAdapter};
use canflash::{
    BootloaderConfig, CanFrame, Client, ClientConfig, FrameKind, ProgressUpdate, RetryPolicy,
    T8Client,
};

pub const TX: u32 = 0x7E0;
pub const RX: u32 = 0x7E8;
pub const KEEPALIVE: u32 = 0x101;

/// Client over `adapter` with a fast retry policy
pub async fn t8_client(adapter: MockAdapter) -> (Arc<MockAdapter>, T8Client) {
    t8_client_with(adapter, BootloaderConfig::default()).await
}

/// Like [`t8_client`] with custom bootloader parameters
pub async fn t8_client_with(
    adapter: MockAdapter,
    config: BootloaderConfig,
) -> (Arc<MockAdapter>, T8Client) {
    let adapter = Arc::new(adapter);
    let client = Client::new(adapter.clone(), ClientConfig::default())
        .await
        .unwrap();
    let t8 = T8Client::new(Arc::new(client), config).with_retry(
        RetryPolicy {
            attempts: 10,
            delay: Duration::from_millis(1),
        },
    );
    (adapter, t8)
}

/// Simulated Trionic 8 with Legion running
pub fn legion_ecu() -> MockAdapter {
    MockAdapter::with_t8_responder(&MockConfig::default())
}

/// Simulated ECU where `hook` may override the Legion reply to a frame
pub fn legion_ecu_with<F>(mut hook: F) -> MockAdapter
where
    F: FnMut(&CanFrame) -> Option<Vec<CanFrame>> + Send + 'static,
{
    let adapter = MockAdapter::new(&MockConfig::default());
    let mut legion = t8_responder();
    adapter.set_responder(move |frame| hook(frame).unwrap_or_else(|| legion(frame)));
    adapter
}

pub fn ecu_reply(data: &[u8]) -> Vec<CanFrame> {
    vec![CanFrame::new(RX, data, FrameKind::Outgoing).unwrap()]
}

/// TransferData first frame: `[0x10, len, 0x36, 0x00, addr]`
pub fn is_announcement(frame: &CanFrame) -> bool {
    frame.id() == TX && frame.byte(0) == 0x10 && frame.byte(2) == 0x36
}

pub fn announced_address(frame: &CanFrame) -> u32 {
    u32::from_be_bytes([frame.byte(4), frame.byte(5), frame.byte(6), frame.byte(7)])
}

/// Last frame of a chunk burst
pub fn is_chunk_ack_request(frame: &CanFrame) -> bool {
    frame.id() == TX
        && frame.kind() == FrameKind::ResponseRequired
        && (0x20..=0x2F).contains(&frame.byte(0))
}

/// Image with a recognisable byte pattern
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Progress sink recording every update
pub fn recorder() -> (
    Arc<parking_lot::Mutex<Vec<ProgressUpdate>>>,
    impl FnMut(ProgressUpdate) + Send,
) {
    let updates = Arc::new(parking_lot::Mutex::new(Vec::<ProgressUpdate>::new()));
    let sink = {
        let updates = updates.clone();
        move |update: ProgressUpdate| updates.lock().push(update)
    };
    (updates, sink)
}
