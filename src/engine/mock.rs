//! In-memory engine for exercising sessions without sockets.
//!
//! Offers must start with `v=`. Answers only list candidates once gathering
//! completed, which tests use to check that no partial answer escapes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

use super::*;
use crate::error::Error;

pub const MOCK_CANDIDATE_LINE: &str = "a=candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host";
pub const MOCK_END_OF_CANDIDATES: &str = "a=end-of-candidates";

/// GatherMode controls when a mock session reports gathering complete.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GatherMode {
    /// complete as soon as the local description is set
    Immediate,
    /// complete after a delay
    After(Duration),
    /// never complete
    Never,
}

#[derive(Debug, Clone)]
pub struct MockOptions {
    pub gather: GatherMode,
    pub fail_new_session: bool,
    pub fail_create_answer: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        MockOptions {
            gather: GatherMode::Immediate,
            fail_new_session: false,
            fail_create_answer: false,
        }
    }
}

/// MockEngine hands out MockSessions and remembers them for inspection.
#[derive(Default)]
pub struct MockEngine {
    options: MockOptions,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockEngine {
    pub fn new(options: MockOptions) -> Arc<Self> {
        Arc::new(MockEngine {
            options,
            sessions: Mutex::new(vec![]),
        })
    }

    pub async fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().await.clone()
    }

    /// last_session is the most recently created session of the role.
    pub async fn last_session(&self, role: Role) -> Option<Arc<MockSession>> {
        let sessions = self.sessions.lock().await;
        sessions.iter().rev().find(|s| s.role == role).cloned()
    }
}

#[async_trait]
impl SessionEngine for MockEngine {
    async fn new_session(&self, role: Role) -> Result<Arc<dyn PeerSession + Send + Sync>> {
        if self.options.fail_new_session {
            return Err(Error::new("mock engine refused session".to_owned()));
        }

        let session = Arc::new(MockSession::new(role, self.options.clone()));
        self.sessions.lock().await.push(Arc::clone(&session));
        Ok(session as Arc<dyn PeerSession + Send + Sync>)
    }
}

/// MockInbound feeds one inbound stream of a mock publisher session.
pub struct MockInbound {
    pub packets: mpsc::Sender<rtp::packet::Packet>,
    pub feedback: mpsc::Sender<RtcpPackets>,
}

/// MockOutbound observes one outbound stream of a mock subscriber session.
pub struct MockOutbound {
    pub packets: mpsc::UnboundedReceiver<rtp::packet::Packet>,
    pub feedback: mpsc::Sender<RtcpPackets>,
    pub sink: Arc<MockSink>,
}

pub struct MockSession {
    role: Role,
    options: MockOptions,

    remote: Mutex<Option<String>>,
    local: Arc<Mutex<Option<String>>>,
    gathered: Arc<AtomicBool>,
    gather_waiters: Arc<Mutex<Vec<mpsc::Sender<()>>>>,

    state_tx: watch::Sender<ConnectivityState>,
    inbound_tx: Mutex<Option<mpsc::Sender<InboundMedia>>>,
    outbound: Mutex<Option<MockOutbound>>,

    keyframe_requests: AtomicUsize,
    close_tx: Mutex<Option<watch::Sender<()>>>,
    close_rx: watch::Receiver<()>,
    closed: AtomicBool,
}

impl MockSession {
    fn new(role: Role, options: MockOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::New);
        let (close_tx, close_rx) = watch::channel(());
        MockSession {
            role,
            options,
            remote: Mutex::new(None),
            local: Arc::new(Mutex::new(None)),
            gathered: Arc::new(AtomicBool::new(false)),
            gather_waiters: Arc::new(Mutex::new(vec![])),
            state_tx,
            inbound_tx: Mutex::new(None),
            outbound: Mutex::new(None),
            keyframe_requests: AtomicUsize::new(0),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn gathering_completed(&self) -> bool {
        self.gathered.load(Ordering::SeqCst)
    }

    pub fn keyframe_requests(&self) -> usize {
        self.keyframe_requests.load(Ordering::SeqCst)
    }

    pub async fn remote_description(&self) -> Option<String> {
        self.remote.lock().await.clone()
    }

    /// set_connectivity drives the session's connectivity state.
    pub fn set_connectivity(&self, state: ConnectivityState) {
        self.state_tx.send_replace(state);
    }

    /// push_inbound delivers a remote stream to the publisher session, as if
    /// the remote peer started sending.
    pub async fn push_inbound(&self, codec: RTCRtpCodecCapability, ssrc: u32) -> Result<MockInbound> {
        let inbound_tx = self.inbound_tx.lock().await.clone();
        let inbound_tx = inbound_tx.ok_or_else(|| Error::new("no inbound transceiver".to_owned()))?;

        let (packets_tx, packets_rx) = mpsc::channel(1024);
        let (feedback_tx, feedback_rx) = mpsc::channel(16);
        let media = InboundMedia {
            codec,
            ssrc,
            packets: Arc::new(MockPacketReader {
                rx: Mutex::new(packets_rx),
                close_rx: self.close_rx.clone(),
            }),
            feedback: Arc::new(MockFeedbackReader {
                rx: Mutex::new(feedback_rx),
                close_rx: self.close_rx.clone(),
            }),
        };
        inbound_tx
            .send(media)
            .await
            .map_err(|_| Error::ErrSourceClosed)?;

        Ok(MockInbound {
            packets: packets_tx,
            feedback: feedback_tx,
        })
    }

    /// take_outbound hands the subscriber's outbound stream to the caller.
    pub async fn take_outbound(&self) -> Option<MockOutbound> {
        self.outbound.lock().await.take()
    }

    fn answer_with_candidates(answer: &str) -> String {
        format!("{answer}{MOCK_CANDIDATE_LINE}\r\n{MOCK_END_OF_CANDIDATES}\r\n")
    }

    async fn complete_gathering(
        local: Arc<Mutex<Option<String>>>,
        answer: String,
        gathered: Arc<AtomicBool>,
        waiters: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
    ) {
        *local.lock().await = Some(MockSession::answer_with_candidates(&answer));
        let mut waiters = waiters.lock().await;
        gathered.store(true, Ordering::SeqCst);
        for tx in waiters.drain(..) {
            let _ = tx.try_send(());
        }
    }
}

#[async_trait]
impl PeerSession for MockSession {
    async fn set_remote_description(&self, sdp: String) -> Result<()> {
        if !sdp.trim_start().starts_with("v=") {
            return Err(Error::ErrMalformedOffer(
                "session description must start with v=".to_owned(),
            ));
        }
        *self.remote.lock().await = Some(sdp);
        Ok(())
    }

    async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        let mut waiters = self.gather_waiters.lock().await;
        if self.gathering_completed() {
            let _ = tx.try_send(());
        } else {
            waiters.push(tx);
        }
        rx
    }

    async fn create_local_description(&self) -> Result<()> {
        if self.remote.lock().await.is_none() {
            return Err(Error::new("remote description is not set".to_owned()));
        }
        if self.options.fail_create_answer {
            return Err(Error::new("mock engine refused answer".to_owned()));
        }

        let answer = format!("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\na=mock-{}\r\n", self.role);
        *self.local.lock().await = Some(answer.clone());
        let local = Arc::clone(&self.local);
        let gathered = Arc::clone(&self.gathered);
        let waiters = Arc::clone(&self.gather_waiters);
        match self.options.gather {
            GatherMode::Immediate => {
                MockSession::complete_gathering(local, answer, gathered, waiters).await;
            }
            GatherMode::After(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    MockSession::complete_gathering(local, answer, gathered, waiters).await;
                });
            }
            GatherMode::Never => {}
        }

        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.local.lock().await.clone()
    }

    async fn accept_inbound(&self) -> Result<mpsc::Receiver<InboundMedia>> {
        let (tx, rx) = mpsc::channel(1);
        *self.inbound_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn attach_outbound(&self, _relay: &RelayTrack) -> Result<OutboundMedia> {
        let (packets_tx, packets_rx) = mpsc::unbounded_channel();
        let (feedback_tx, feedback_rx) = mpsc::channel(16);
        let sink = MockSink::new(packets_tx);

        *self.outbound.lock().await = Some(MockOutbound {
            packets: packets_rx,
            feedback: feedback_tx,
            sink: Arc::clone(&sink),
        });

        Ok(OutboundMedia {
            sink,
            feedback: Arc::new(MockFeedbackReader {
                rx: Mutex::new(feedback_rx),
                close_rx: self.close_rx.clone(),
            }),
        })
    }

    async fn request_keyframe(&self, _media_ssrc: u32) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ErrConnectivityFailed);
        }
        self.keyframe_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_tx.lock().await.take();
        self.inbound_tx.lock().await.take();
        self.gather_waiters.lock().await.clear();
        self.state_tx.send_replace(ConnectivityState::Closed);
        Ok(())
    }
}

struct MockPacketReader {
    rx: Mutex<mpsc::Receiver<rtp::packet::Packet>>,
    close_rx: watch::Receiver<()>,
}

#[async_trait]
impl PacketReader for MockPacketReader {
    async fn read_rtp(&self) -> Result<rtp::packet::Packet> {
        let mut rx = self.rx.lock().await;
        let mut close_rx = self.close_rx.clone();
        tokio::select! {
            pkt = rx.recv() => pkt.ok_or(Error::ErrSourceClosed),
            _ = close_rx.changed() => Err(Error::ErrSourceClosed),
        }
    }
}

struct MockFeedbackReader {
    rx: Mutex<mpsc::Receiver<RtcpPackets>>,
    close_rx: watch::Receiver<()>,
}

#[async_trait]
impl FeedbackReader for MockFeedbackReader {
    async fn read_rtcp(&self) -> Result<RtcpPackets> {
        let mut rx = self.rx.lock().await;
        let mut close_rx = self.close_rx.clone();
        tokio::select! {
            pkts = rx.recv() => pkts.ok_or(Error::ErrSourceClosed),
            _ = close_rx.changed() => Err(Error::ErrSourceClosed),
        }
    }
}

/// MockSink records written packets; close is counted and idempotent.
pub struct MockSink {
    tx: mpsc::UnboundedSender<rtp::packet::Packet>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl MockSink {
    pub fn new(tx: mpsc::UnboundedSender<rtp::packet::Packet>) -> Arc<Self> {
        Arc::new(MockSink {
            tx,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        })
    }

    /// fail_next makes the next `n` writes fail without closing the sink.
    pub fn fail_next(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Writer for MockSink {
    async fn write_rtp(&self, pkt: &rtp::packet::Packet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ErrSinkClosed);
        }
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::new("mock sink write failed".to_owned()));
        }
        self.tx.send(pkt.clone()).map_err(|_| Error::ErrSinkClosed)
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
