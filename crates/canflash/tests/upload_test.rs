//! Bootloader upload against a simulated Trionic 8

mod common;

use canflash::{
    BootloaderConfig, CanFrame, FrameKind, GmlanError, NegativeResponseCode, ProgressUpdate,
    T8Error, UploadState,
};
use common::*;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const START: u32 = 0x102400;

#[tokio::test]
async fn test_chunk_accounting() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();

    let report = t8
        .upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap();

    assert_eq!(report.chunks, 42);
    assert_eq!(report.end_address, START + 42 * 0xEA + 6);
    assert_eq!(report.bytes_sent, 42 * 238 + 7);

    let sent = adapter.sent_frames();
    let announcements: Vec<&CanFrame> = sent.iter().filter(|f| is_announcement(f)).collect();
    assert_eq!(announcements.len(), 43);
    for (i, frame) in announcements[..42].iter().enumerate() {
        assert_eq!(frame.byte(1), 0xF0);
        assert_eq!(announced_address(frame), START + i as u32 * 0xEA);
    }
    let finalize = announcements[42];
    assert_eq!(finalize.byte(1), 0x0A);
    assert_eq!(announced_address(finalize), START + 42 * 0xEA);

    let acks = sent.iter().filter(|f| is_chunk_ack_request(f)).count();
    assert_eq!(acks, 43);
}

#[tokio::test]
async fn test_progress_updates() {
    let (_adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();
    let (updates, mut sink) = recorder();

    t8.upload_bootloader(&cancel, &image(9996), &mut sink)
        .await
        .unwrap();

    let updates = updates.lock();
    assert_eq!(updates[0], ProgressUpdate::Total(42));
    assert_eq!(updates[0].as_counter(), Some(-42));
    assert_eq!(updates[1], ProgressUpdate::Chunk(0));

    let chunks: Vec<usize> = updates
        .iter()
        .filter_map(|u| match u {
            ProgressUpdate::Chunk(n) => Some(*n),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, (0..=42).collect::<Vec<_>>());

    let done: Vec<&String> = updates
        .iter()
        .filter_map(|u| match u {
            ProgressUpdate::Message(m) if m.starts_with("Done, took: ") => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(done.len(), 1);
    assert_eq!(updates.last(), Some(&ProgressUpdate::Message(done[0].clone())));
}

#[tokio::test]
async fn test_sequence_bytes_per_chunk() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();

    t8.upload_bootloader(&cancel, &image(3 * 238), &mut canflash::NoProgress)
        .await
        .unwrap();

    let mut expected: Vec<u8> = (0x21..=0x2F).collect();
    expected.extend(0x20..=0x2F);
    expected.extend(0x20..=0x22);

    let sent = adapter.sent_frames();
    let starts: Vec<usize> = sent
        .iter()
        .enumerate()
        .filter(|(_, f)| is_announcement(f))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(starts.len(), 4);

    for &start in &starts[..3] {
        let burst = &sent[start + 1..start + 35];
        let sequence: Vec<u8> = burst.iter().map(|f| f.byte(0)).collect();
        assert_eq!(sequence, expected);
        for frame in &burst[..33] {
            assert_eq!(frame.kind(), FrameKind::Outgoing);
        }
        assert_eq!(burst[33].kind(), FrameKind::ResponseRequired);
    }
}

/// Frames sent after the final announcement
fn finalize_burst(sent: &[CanFrame]) -> Vec<CanFrame> {
    let last = sent.iter().rposition(is_announcement).unwrap();
    sent[last + 1..]
        .iter()
        .filter(|f| f.id() == TX && (0x20..=0x2F).contains(&f.byte(0)))
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_image_bytes_are_streamed_in_order() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();
    let data = image(238 + 4);

    let report = t8
        .upload_bootloader(&cancel, &data, &mut canflash::NoProgress)
        .await
        .unwrap();
    assert_eq!(report.chunks, 1);

    let sent = adapter.sent_frames();
    let streamed: Vec<u8> = sent
        .iter()
        .filter(|f| f.id() == TX && (0x20..=0x2F).contains(&f.byte(0)))
        .flat_map(|f| f.data()[1..].to_vec())
        .collect();

    // One full chunk, then a single tail frame zero padded to 7 bytes
    assert_eq!(streamed.len(), 238 + 7);
    assert_eq!(&streamed[..242], &data[..]);
    assert!(streamed[242..].iter().all(|b| *b == 0));
    assert_eq!(finalize_burst(&sent).len(), 1);
}

#[tokio::test]
async fn test_finalize_announcement_covers_tail() {
    // 6 header bytes plus 20 image bytes
    let config = BootloaderConfig {
        finalize_subfunction: 0x1A,
        ..BootloaderConfig::default()
    };
    let (adapter, t8) = t8_client_with(legion_ecu(), config).await;
    let cancel = CancellationToken::new();
    let data = image(2 * 238 + 20);

    t8.upload_bootloader(&cancel, &data, &mut canflash::NoProgress)
        .await
        .unwrap();

    let sent = adapter.sent_frames();
    let finalize = sent.iter().filter(|f| is_announcement(f)).last().unwrap();
    assert_eq!(finalize.byte(1), 0x1A);

    let burst = finalize_burst(&sent);
    assert_eq!(burst.len(), 3);
    assert_eq!(burst[0].byte(0), 0x21);
    assert_eq!(burst[2].kind(), FrameKind::ResponseRequired);
    let tail: Vec<u8> = burst.iter().flat_map(|f| f.data()[1..].to_vec()).collect();
    assert_eq!(&tail[..20], &data[2 * 238..]);
    assert!(tail[20..].iter().all(|b| *b == 0));
}

#[tokio::test]
async fn test_tail_longer_than_final_transfer_is_rejected() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();

    let err = t8
        .upload_bootloader(&cancel, &image(2 * 238 + 100), &mut canflash::NoProgress)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        T8Error::TailTooLong {
            tail: 100,
            capacity: 4
        }
    );
    assert!(adapter.sent_frames().is_empty());
}

#[tokio::test]
async fn test_invalid_bootloader_config_is_rejected() {
    let config = BootloaderConfig {
        keepalive_every: 0,
        ..BootloaderConfig::default()
    };
    let (adapter, t8) = t8_client_with(legion_ecu(), config).await;
    let cancel = CancellationToken::new();

    let err = t8
        .upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, T8Error::InvalidConfig(_)));

    let config = BootloaderConfig {
        chunk_wire_len: 0,
        ..BootloaderConfig::default()
    };
    let (_adapter, t8) = t8_client_with(legion_ecu(), config).await;
    let err = t8
        .upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, T8Error::InvalidConfig(_)));
    assert!(adapter.sent_frames().is_empty());
}

#[tokio::test]
async fn test_keepalive_cadence() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();

    t8.upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap();
    // The trailing keep-alive is only queued when the upload returns
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let sent = adapter.sent_frames();
    let keepalives: Vec<usize> = sent
        .iter()
        .enumerate()
        .filter(|(_, f)| f.id() == KEEPALIVE)
        .map(|(i, _)| i)
        .collect();

    // Before chunks 16 and 31, and once after the final transfer
    assert_eq!(keepalives.len(), 3);
    for (&position, chunk) in keepalives[..2].iter().zip([15u32, 30]) {
        let next = &sent[position + 1];
        assert!(is_announcement(next));
        assert_eq!(announced_address(next), START + chunk * 0xEA);
        assert_eq!(sent[position].data(), &[0xFE, 0x01, 0x3E]);
        assert_eq!(sent[position].kind(), FrameKind::Outgoing);
    }
    assert_eq!(keepalives[2], sent.len() - 1);
}

#[tokio::test]
async fn test_bad_chunk_ack_aborts() {
    let mut acks = 0;
    let ecu = legion_ecu_with(move |frame| {
        if is_chunk_ack_request(frame) {
            acks += 1;
            if acks == 3 {
                return Some(ecu_reply(&[0x01, 0x75]));
            }
        }
        None
    });
    let (adapter, t8) = t8_client(ecu).await;
    let cancel = CancellationToken::new();
    let (updates, mut sink) = recorder();

    let err = t8
        .upload_bootloader(&cancel, &image(9996), &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        T8Error::Upload {
            state: UploadState::Uploading,
            source: GmlanError::ProtocolViolation(_),
        }
    ));
    let announcements = adapter
        .sent_frames()
        .iter()
        .filter(|f| is_announcement(f))
        .count();
    assert_eq!(announcements, 3);

    let updates = updates.lock();
    assert!(matches!(
        updates.last(),
        Some(ProgressUpdate::Message(m)) if m.starts_with("Upload failed")
    ));
    assert!(!updates
        .iter()
        .any(|u| matches!(u, ProgressUpdate::Message(m) if m.starts_with("Done"))));
}

#[tokio::test]
async fn test_negative_announcement_reply() {
    let mut announcements = 0;
    let ecu = legion_ecu_with(move |frame| {
        if is_announcement(frame) {
            announcements += 1;
            if announcements == 5 {
                return Some(ecu_reply(&[0x03, 0x7F, 0x36, 0x85]));
            }
        }
        None
    });
    let (_adapter, t8) = t8_client(ecu).await;
    let cancel = CancellationToken::new();

    let err = t8
        .upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.nrc(), Some(NegativeResponseCode::GeneralProgrammingFailure));
    assert!(matches!(
        err,
        T8Error::Upload {
            state: UploadState::Uploading,
            ..
        }
    ));
}

#[tokio::test]
async fn test_finalize_failure_is_tagged() {
    let ecu = legion_ecu_with(|frame| {
        if is_announcement(frame) && frame.byte(1) == 0x0A {
            return Some(ecu_reply(&[0x03, 0x7F, 0x36, 0x72]));
        }
        None
    });
    let (_adapter, t8) = t8_client(ecu).await;
    let cancel = CancellationToken::new();

    let err = t8
        .upload_bootloader(&cancel, &image(2 * 238 + 4), &mut canflash::NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        T8Error::Upload {
            state: UploadState::Finalizing,
            ..
        }
    ));
    assert_eq!(err.nrc(), Some(NegativeResponseCode::TransferAborted));
}

#[tokio::test]
async fn test_handshake_rejected() {
    let ecu = legion_ecu_with(|frame| {
        (frame.byte(1) == 0x34).then(|| ecu_reply(&[0x03, 0x7F, 0x34, 0x22]))
    });
    let (adapter, t8) = t8_client(ecu).await;
    let cancel = CancellationToken::new();

    let err = t8
        .upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        T8Error::Upload {
            state: UploadState::Handshake,
            ..
        }
    ));
    assert_eq!(adapter.sent_frames().len(), 1);
}

#[tokio::test]
async fn test_empty_image() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();

    let err = t8
        .upload_bootloader(&cancel, &[], &mut canflash::NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err, T8Error::EmptyImage);
    assert!(adapter.sent_frames().is_empty());
}

#[tokio::test]
async fn test_cancelled_upload() {
    let (_adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = t8
        .upload_bootloader(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_upload_and_start() {
    let (adapter, t8) = t8_client(legion_ecu()).await;
    let cancel = CancellationToken::new();

    t8.upload_and_start(&cancel, &image(9996), &mut canflash::NoProgress)
        .await
        .unwrap();

    let sent = adapter.sent_frames();
    let start = sent
        .iter()
        .find(|f| f.byte(1) == 0x36 && f.byte(2) == 0x80)
        .unwrap();
    assert_eq!(start.data(), &[0x06, 0x36, 0x80, 0x00, 0x10, 0x24, 0x00, 0x00]);
}
