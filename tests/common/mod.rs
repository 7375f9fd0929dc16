#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use webrtc::rtp;
use whip_whep_relay::config::RelayConfig;
use whip_whep_relay::engine::mock::{MockEngine, MockOptions, MockOutbound};
use whip_whep_relay::engine::SessionEngine;
use whip_whep_relay::relay::RelayTrack;
use whip_whep_relay::session::{Negotiator, SessionRegistry};

pub const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
pub const TEST_TIME_LIMIT: Duration = Duration::from_secs(5);
pub const MEDIA_SSRC: u32 = 0x1234;

pub fn new_negotiator(options: MockOptions, config: RelayConfig) -> (Arc<MockEngine>, Arc<Negotiator>) {
    let engine = MockEngine::new(options);
    let relay = RelayTrack::new(
        config.codec.capability(),
        config.track_id.clone(),
        config.stream_id.clone(),
        config.consumer_buffer,
    );
    let negotiator = Negotiator::new(
        Arc::clone(&engine) as Arc<dyn SessionEngine + Send + Sync>,
        relay,
        SessionRegistry::new(),
        config,
    );
    (engine, Arc::new(negotiator))
}

pub fn packet(seq: u16) -> rtp::packet::Packet {
    rtp::packet::Packet {
        header: rtp::header::Header {
            version: 2,
            payload_type: 96,
            sequence_number: seq,
            timestamp: seq as u32 * 3000,
            ssrc: MEDIA_SSRC,
            ..Default::default()
        },
        payload: Bytes::from(vec![seq as u8; 4]),
    }
}

/// recv_seqs collects the sequence numbers of the next `n` outbound packets.
pub async fn recv_seqs(outbound: &mut MockOutbound, n: usize) -> Vec<u16> {
    let mut seqs = vec![];
    for _ in 0..n {
        match tokio::time::timeout(TEST_TIME_LIMIT, outbound.packets.recv()).await {
            Ok(Some(pkt)) => seqs.push(pkt.header.sequence_number),
            _ => break,
        }
    }
    seqs
}

/// assert_quiet checks that no further packet shows up for a while.
pub async fn assert_quiet(outbound: &mut MockOutbound) {
    let res = tokio::time::timeout(Duration::from_millis(100), outbound.packets.recv()).await;
    assert!(
        !matches!(res, Ok(Some(_))),
        "unexpected packet {:?}",
        res.ok().flatten().map(|p| p.header.sequence_number)
    );
}

/// eventually polls `f` until it holds or the time limit passes.
pub async fn eventually<F, Fut>(what: &str, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TEST_TIME_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if f().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
