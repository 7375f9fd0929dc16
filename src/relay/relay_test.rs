use super::*;

use bytes::Bytes;
use std::time::Duration;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_VP8};

fn h264() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_owned(),
        clock_rate: 90000,
        ..Default::default()
    }
}

fn new_relay(buffer: usize) -> Arc<RelayTrack> {
    RelayTrack::new(h264(), "video".to_owned(), "webrtc-rs".to_owned(), buffer)
}

fn packet(seq: u16) -> rtp::packet::Packet {
    rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            sequence_number: seq,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x00, 0x01]),
    }
}

async fn recv_seqs(consumer: &mut RelayConsumer, n: usize) -> Vec<u16> {
    let mut seqs = vec![];
    for _ in 0..n {
        let pkt = tokio::time::timeout(Duration::from_secs(1), consumer.recv())
            .await
            .expect("should not time out")
            .expect("consumer should stay open");
        seqs.push(pkt.header.sequence_number);
    }
    seqs
}

#[tokio::test]
async fn test_relay_write_without_producer() {
    let relay = new_relay(8);
    let result = relay.write_rtp(&packet(1)).await;
    assert!(matches!(result, Err(Error::ErrRelayUnavailable)));

    let producer = relay.claim_producer().unwrap();
    let result = relay.write_rtp(&packet(1)).await;
    assert!(
        matches!(result, Err(Error::ErrRelayUnavailable)),
        "writes need a bound codec, not just a claimed slot"
    );

    producer.bind_codec(&h264()).unwrap();
    assert!(relay.write_rtp(&packet(1)).await.is_ok());
    assert_eq!(relay.stats().forwarded, 1);
}

#[tokio::test]
async fn test_relay_producer_slot_exclusive() {
    let relay = new_relay(8);

    let first = relay.claim_producer().unwrap();
    assert!(relay.has_producer());
    assert!(matches!(
        relay.claim_producer(),
        Err(Error::ErrPublisherActive)
    ));
    assert!(matches!(
        relay.claim_producer(),
        Err(Error::ErrPublisherActive)
    ));

    drop(first);
    assert!(!relay.has_producer());

    let second = relay.claim_producer().unwrap();
    second.bind_codec(&h264()).unwrap();
    assert!(relay.has_producer());
}

#[tokio::test]
async fn test_relay_producer_release_unbinds_codec() {
    let relay = new_relay(8);
    let producer = relay.claim_producer().unwrap();
    producer.bind_codec(&h264()).unwrap();
    assert!(relay.write_rtp(&packet(1)).await.is_ok());

    drop(producer);
    assert!(matches!(
        relay.write_rtp(&packet(2)).await,
        Err(Error::ErrRelayUnavailable)
    ));
}

#[test]
fn test_relay_codec_mismatch() {
    let relay = new_relay(8);
    let producer = relay.claim_producer().unwrap();

    let vp8 = RTCRtpCodecCapability {
        mime_type: MIME_TYPE_VP8.to_owned(),
        clock_rate: 90000,
        ..Default::default()
    };
    assert!(matches!(
        producer.bind_codec(&vp8),
        Err(Error::ErrCodecUnsupported { .. })
    ));

    let lower = RTCRtpCodecCapability {
        mime_type: "video/h264".to_owned(),
        ..Default::default()
    };
    assert!(producer.bind_codec(&lower).is_ok());
}

#[tokio::test]
async fn test_relay_no_replay_for_late_consumer() {
    let relay = new_relay(16);
    let producer = relay.claim_producer().unwrap();
    producer.bind_codec(&h264()).unwrap();

    let mut a = relay.register_consumer().unwrap();
    relay.write_rtp(&packet(1)).await.unwrap();
    relay.write_rtp(&packet(2)).await.unwrap();

    let mut b = relay.register_consumer().unwrap();
    for seq in 3..=5 {
        relay.write_rtp(&packet(seq)).await.unwrap();
    }

    assert_eq!(recv_seqs(&mut a, 5).await, vec![1, 2, 3, 4, 5]);
    assert_eq!(recv_seqs(&mut b, 3).await, vec![3, 4, 5]);

    drop(relay);
    drop(producer);
    assert!(a.recv().await.is_none());
    assert!(b.recv().await.is_none());
}

#[tokio::test]
async fn test_relay_consumer_drop_deregisters() {
    let relay = new_relay(8);
    let producer = relay.claim_producer().unwrap();
    producer.bind_codec(&h264()).unwrap();

    let a = relay.register_consumer().unwrap();
    let mut b = relay.register_consumer().unwrap();
    assert_eq!(relay.consumer_count(), 2);

    drop(a);
    assert_eq!(relay.consumer_count(), 1);

    relay.write_rtp(&packet(7)).await.unwrap();
    assert_eq!(recv_seqs(&mut b, 1).await, vec![7]);

    relay.deregister_consumer(b.id());
    relay.deregister_consumer(b.id());
    assert_eq!(relay.consumer_count(), 0);
    assert!(b.recv().await.is_none());
}

#[tokio::test]
async fn test_relay_consumer_reads_relay_stats() {
    let relay = new_relay(8);
    let producer = relay.claim_producer().unwrap();
    producer.bind_codec(&h264()).unwrap();

    let mut a = relay.register_consumer().unwrap();
    relay.write_rtp(&packet(1)).await.unwrap();
    assert_eq!(recv_seqs(&mut a, 1).await, vec![1]);
    assert_eq!(
        a.relay_stats(),
        Some(RelayStats {
            forwarded: 1,
            dropped: 0,
            consumers: 1,
        })
    );

    drop(producer);
    drop(relay);
    assert_eq!(a.relay_stats(), None);
}

#[tokio::test]
async fn test_relay_full_consumer_does_not_block_others() {
    let relay = new_relay(2);
    let producer = relay.claim_producer().unwrap();
    producer.bind_codec(&h264()).unwrap();

    let mut slow = relay.register_consumer().unwrap();
    let mut fast = relay.register_consumer().unwrap();

    for seq in 1..=2 {
        relay.write_rtp(&packet(seq)).await.unwrap();
    }
    assert_eq!(recv_seqs(&mut fast, 2).await, vec![1, 2]);

    for seq in 3..=4 {
        relay.write_rtp(&packet(seq)).await.unwrap();
    }
    assert_eq!(recv_seqs(&mut fast, 2).await, vec![3, 4]);

    // slow never drained: it keeps its first two packets, drops the rest
    assert_eq!(recv_seqs(&mut slow, 2).await, vec![1, 2]);
    assert_eq!(relay.stats().dropped, 2);
    assert_eq!(relay.stats().forwarded, 4);
}

#[tokio::test]
async fn test_relay_close_idempotent() {
    let relay = new_relay(8);
    let mut consumer = relay.register_consumer().unwrap();

    assert!(relay.close().await.is_ok());
    assert!(relay.close().await.is_ok());
    assert!(relay.is_closed());

    assert!(consumer.recv().await.is_none());
    assert!(matches!(
        relay.write_rtp(&packet(1)).await,
        Err(Error::ErrSinkClosed)
    ));
    assert!(matches!(
        relay.register_consumer(),
        Err(Error::ErrSinkClosed)
    ));
    assert!(matches!(
        relay.claim_producer(),
        Err(Error::ErrSinkClosed)
    ));
}

#[tokio::test]
async fn test_relay_concurrent_registration_during_writes() {
    let relay = new_relay(1024);
    let producer = relay.claim_producer().unwrap();
    producer.bind_codec(&h264()).unwrap();

    let mut steady = relay.register_consumer().unwrap();

    let churn_relay = Arc::clone(&relay);
    let churn = tokio::spawn(async move {
        for _ in 0..200 {
            let c = churn_relay.register_consumer().unwrap();
            tokio::task::yield_now().await;
            drop(c);
        }
    });

    for seq in 0..500u16 {
        relay.write_rtp(&packet(seq)).await.unwrap();
        if seq % 16 == 0 {
            tokio::task::yield_now().await;
        }
    }
    churn.await.unwrap();

    let seqs = recv_seqs(&mut steady, 500).await;
    assert_eq!(seqs, (0..500u16).collect::<Vec<u16>>());
    assert_eq!(relay.consumer_count(), 1);
}
