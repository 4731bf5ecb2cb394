//! Session state-machine tests over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use spooltag_bridge::protocol::{decode_blocks, encode_blocks, Envelope};
use spooltag_bridge::session::BridgeSession;
use spooltag_bridge::transport::{memory_pair, MemoryPeer, TransportEvent};
use spooltag_keys::derive_keys;
use spooltag_types::config::BridgeConfig;
use spooltag_types::error::SpooltagError;
use spooltag_types::tag::{sector_trailer_block, TagImage, TagUid};

const LONG: Duration = Duration::from_secs(5);

async fn connected_session() -> (Arc<BridgeSession>, MemoryPeer) {
    let (handle, peer) = memory_pair();
    let session = Arc::new(BridgeSession::new(BridgeConfig::default(), handle));
    peer.events.send(TransportEvent::Connected).await.unwrap();
    let mut status = session.status();
    status.wait_for(|s| s.connected).await.unwrap();
    (session, peer)
}

fn zero_blocks() -> Vec<String> {
    encode_blocks(&TagImage::zeroed())
}

#[tokio::test]
async fn read_resolves_on_matching_response() {
    let (session, mut peer) = connected_session().await;

    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });

    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, keys } => {
            assert!(keys.is_none());
            request_id
        }
        other => panic!("expected READ_TAG, got {other:?}"),
    };

    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "DEADBEEF".to_string(),
            blocks: zero_blocks(),
            request_id,
            sectors_read: Some(0xFFFF),
        }))
        .await
        .unwrap();

    let outcome = reader.await.unwrap().unwrap();
    assert_eq!(outcome.uid, TagUid::from_hex("DEADBEEF").unwrap());
    assert!(outcome.readable.is_readable(0));
    assert_eq!(outcome.record.spool_weight_g, 0);
}

#[tokio::test]
async fn second_request_is_rejected_without_disturbing_the_first() {
    let (session, mut peer) = connected_session().await;

    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });

    let first_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, .. } => request_id,
        other => panic!("expected READ_TAG, got {other:?}"),
    };

    // Second request while the first is awaiting a tag.
    let err = session.request_read(LONG).await.unwrap_err();
    assert!(matches!(err, SpooltagError::RequestInProgress));

    // The first request still completes under its original id.
    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "DEADBEEF".to_string(),
            blocks: zero_blocks(),
            request_id: first_id,
            sectors_read: None,
        }))
        .await
        .unwrap();
    assert!(reader.await.unwrap().is_ok());
}

#[tokio::test]
async fn late_response_after_timeout_is_discarded() {
    let (session, mut peer) = connected_session().await;

    let err = session
        .request_read(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, SpooltagError::Timeout));

    let stale_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, .. } => request_id,
        other => panic!("expected READ_TAG, got {other:?}"),
    };

    // The agent finishes anyway; the stale response must be ignored and
    // the session must be Idle again for the next request.
    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "DEADBEEF".to_string(),
            blocks: zero_blocks(),
            request_id: stale_id.clone(),
            sectors_read: None,
        }))
        .await
        .unwrap();

    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });
    let fresh_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, .. } => request_id,
        other => panic!("expected READ_TAG, got {other:?}"),
    };
    assert_ne!(fresh_id, stale_id);

    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "7AD43F1C".to_string(),
            blocks: zero_blocks(),
            request_id: fresh_id,
            sectors_read: None,
        }))
        .await
        .unwrap();
    let outcome = reader.await.unwrap().unwrap();
    assert_eq!(outcome.uid.to_hex(), "7AD43F1C");
}

#[tokio::test]
async fn mismatched_correlation_id_is_ignored() {
    let (session, mut peer) = connected_session().await;

    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });
    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, .. } => request_id,
        other => panic!("expected READ_TAG, got {other:?}"),
    };

    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "11111111".to_string(),
            blocks: zero_blocks(),
            request_id: "not-the-right-id".to_string(),
            sectors_read: None,
        }))
        .await
        .unwrap();
    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "DEADBEEF".to_string(),
            blocks: zero_blocks(),
            request_id,
            sectors_read: None,
        }))
        .await
        .unwrap();

    let outcome = reader.await.unwrap().unwrap();
    assert_eq!(outcome.uid.to_hex(), "DEADBEEF");
}

#[tokio::test]
async fn wrong_kind_reply_fails_the_read_fast() {
    let (session, mut peer) = connected_session().await;

    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });
    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, .. } => request_id,
        other => panic!("expected READ_TAG, got {other:?}"),
    };

    // A correlated WRITE_RESULT answering a read must fail the caller
    // immediately, not leave it hanging until the deadline.
    peer.events
        .send(TransportEvent::Envelope(Envelope::WriteResult {
            success: true,
            blocks_written: 47,
            error: None,
            request_id,
        }))
        .await
        .unwrap();

    let err = reader.await.unwrap().unwrap_err();
    assert!(matches!(err, SpooltagError::ProtocolViolation(_)));

    // The pending slot is free again for the next request.
    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });
    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::ReadTag { request_id, .. } => request_id,
        other => panic!("expected READ_TAG, got {other:?}"),
    };
    peer.events
        .send(TransportEvent::Envelope(Envelope::TagData {
            uid: "DEADBEEF".to_string(),
            blocks: zero_blocks(),
            request_id,
            sectors_read: None,
        }))
        .await
        .unwrap();
    assert!(reader.await.unwrap().is_ok());
}

#[tokio::test]
async fn request_without_agent_fails_fast() {
    let (handle, _peer) = memory_pair();
    let session = BridgeSession::new(BridgeConfig::default(), handle);
    let err = session.request_read(LONG).await.unwrap_err();
    assert!(matches!(err, SpooltagError::NoBridgeConnected));
}

#[tokio::test]
async fn disconnect_fails_the_pending_request_immediately() {
    let (session, mut peer) = connected_session().await;

    let reader = tokio::spawn({
        let session = session.clone();
        async move { session.request_read(LONG).await }
    });
    let _ = peer.outbound.recv().await.unwrap();

    peer.events
        .send(TransportEvent::Disconnected)
        .await
        .unwrap();

    let err = reader.await.unwrap().unwrap_err();
    assert!(matches!(err, SpooltagError::NoBridgeConnected));
    assert!(!session.is_connected());
}

#[tokio::test]
async fn write_carries_derived_keys_and_reports_partial_count() {
    let (session, mut peer) = connected_session().await;

    let mut image = TagImage::zeroed();
    image.block_mut(0).0[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    image.block_mut(1).0[..3].copy_from_slice(b"PLA");

    let writer = tokio::spawn({
        let session = session.clone();
        let image = image.clone();
        async move { session.request_write(&image, LONG).await }
    });

    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::WriteTag {
            request_id,
            keys,
            blocks,
            uid,
        } => {
            assert_eq!(keys.len(), 16);
            assert_eq!(blocks.len(), 64);
            assert!(uid.is_none());
            // Keys are derived from the uid embedded in block 0.
            let expected =
                derive_keys(&BridgeConfig::default().kdf, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
            assert_eq!(keys, expected.to_hex_list());
            request_id
        }
        other => panic!("expected WRITE_TAG, got {other:?}"),
    };

    peer.events
        .send(TransportEvent::Envelope(Envelope::WriteResult {
            success: true,
            blocks_written: 42,
            error: None,
            request_id,
        }))
        .await
        .unwrap();

    let outcome = writer.await.unwrap().unwrap();
    assert_eq!(outcome.blocks_written, 42);
}

#[tokio::test]
async fn failed_write_surfaces_the_agent_error() {
    let (session, mut peer) = connected_session().await;

    let writer = tokio::spawn({
        let session = session.clone();
        async move { session.request_write(&TagImage::zeroed(), LONG).await }
    });
    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::WriteTag { request_id, .. } => request_id,
        other => panic!("expected WRITE_TAG, got {other:?}"),
    };

    peer.events
        .send(TransportEvent::Envelope(Envelope::WriteResult {
            success: false,
            blocks_written: 0,
            error: Some("uid rewriting is not supported by this reader".to_string()),
            request_id,
        }))
        .await
        .unwrap();

    let err = writer.await.unwrap().unwrap_err();
    assert!(matches!(err, SpooltagError::Agent(_)));
}

#[tokio::test]
async fn clone_masks_block0_and_trailers() {
    let (session, mut peer) = connected_session().await;

    let mut source = TagImage::zeroed();
    source.block_mut(0).0 = [0x11; 16];
    source.block_mut(1).0 = [0x22; 16];
    source.block_mut(sector_trailer_block(0)).0 = [0x33; 16];
    source.block_mut(5).0 = [0x44; 16];
    let source_uid = TagUid::from_hex("DEADBEEF").unwrap();

    let writer = tokio::spawn({
        let session = session.clone();
        let source = source.clone();
        async move { session.request_clone(source_uid, &source, true, LONG).await }
    });

    let request_id = match peer.outbound.recv().await.unwrap() {
        Envelope::WriteTag {
            request_id,
            blocks,
            uid,
            ..
        } => {
            // Rewrite target is forwarded for magic tags.
            assert_eq!(uid.as_deref(), Some("DEADBEEF"));
            let payload = decode_blocks(&blocks).unwrap();
            assert!(payload.block(0).is_zero());
            assert!(payload.block(sector_trailer_block(0)).is_zero());
            assert_eq!(payload.block(1).0, [0x22; 16]);
            assert_eq!(payload.block(5).0, [0x44; 16]);
            request_id
        }
        other => panic!("expected WRITE_TAG, got {other:?}"),
    };

    peer.events
        .send(TransportEvent::Envelope(Envelope::WriteResult {
            success: true,
            blocks_written: 46,
            error: None,
            request_id,
        }))
        .await
        .unwrap();
    assert_eq!(writer.await.unwrap().unwrap().blocks_written, 46);
}

#[tokio::test]
async fn status_and_detection_events_update_the_watch() {
    let (session, peer) = connected_session().await;

    peer.events
        .send(TransportEvent::Envelope(Envelope::Status {
            connected: true,
            device: "pixel-7".to_string(),
        }))
        .await
        .unwrap();
    peer.events
        .send(TransportEvent::Envelope(Envelope::TagDetected {
            uid: "7AD43F1C".to_string(),
        }))
        .await
        .unwrap();

    let mut status = session.status();
    status
        .wait_for(|s| s.device.as_deref() == Some("pixel-7") && s.last_tag.is_some())
        .await
        .unwrap();
    assert_eq!(status.borrow().last_tag.as_deref(), Some("7AD43F1C"));
}
