pub mod connectivity_state;
pub mod mock;
pub mod rtc;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::{rtcp, rtp};

pub use connectivity_state::ConnectivityState;

use crate::error::Result;
use crate::media::io::Writer;
use crate::relay::RelayTrack;
use crate::session::Role;

pub type RtcpPackets = Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>;

/// PacketReader yields the RTP packets of one inbound stream.
#[async_trait]
pub trait PacketReader {
    /// read_rtp waits for the next packet. Once the stream is gone every call
    /// returns an error.
    async fn read_rtp(&self) -> Result<rtp::packet::Packet>;
}

/// FeedbackReader yields the RTCP traffic of one stream. It has to be read
/// continuously so that interceptors keep running.
#[async_trait]
pub trait FeedbackReader {
    async fn read_rtcp(&self) -> Result<RtcpPackets>;
}

/// InboundMedia is a remote stream delivered to a publisher session.
pub struct InboundMedia {
    pub codec: RTCRtpCodecCapability,
    pub ssrc: u32,
    pub packets: Arc<dyn PacketReader + Send + Sync>,
    pub feedback: Arc<dyn FeedbackReader + Send + Sync>,
}

/// OutboundMedia is the local stream a subscriber session writes to.
pub struct OutboundMedia {
    pub sink: Arc<dyn Writer + Send + Sync>,
    pub feedback: Arc<dyn FeedbackReader + Send + Sync>,
}

/// PeerSession is one negotiated transport context.
///
/// The offer/answer steps must run in order: set_remote_description, then
/// gathering_complete_promise, then create_local_description. Media wiring
/// (accept_inbound or attach_outbound) happens before the remote description
/// is applied.
#[async_trait]
pub trait PeerSession {
    /// set_remote_description applies a raw offer. An unparseable offer
    /// fails with ErrMalformedOffer.
    async fn set_remote_description(&self, sdp: String) -> Result<()>;

    /// gathering_complete_promise returns a channel that yields or closes
    /// once candidate gathering has finished. It must be requested before
    /// create_local_description so the completion event cannot be missed.
    async fn gathering_complete_promise(&self) -> mpsc::Receiver<()>;

    /// create_local_description creates the answer and applies it locally,
    /// which starts candidate gathering.
    async fn create_local_description(&self) -> Result<()>;

    /// local_description is the current local SDP, including every gathered
    /// candidate once gathering is complete.
    async fn local_description(&self) -> Option<String>;

    /// accept_inbound prepares a receive-only video transceiver and returns
    /// the channel on which remote streams will be delivered.
    async fn accept_inbound(&self) -> Result<mpsc::Receiver<InboundMedia>>;

    /// attach_outbound adds a send-only stream carrying the relay's codec.
    async fn attach_outbound(&self, relay: &RelayTrack) -> Result<OutboundMedia>;

    /// request_keyframe sends a picture loss indication for an inbound stream.
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<()>;

    /// connectivity subscribes to connectivity state changes.
    fn connectivity(&self) -> watch::Receiver<ConnectivityState>;

    /// close shuts the transport down; it is idempotent.
    async fn close(&self) -> Result<()>;
}

/// SessionEngine builds a fresh PeerSession with the policy pipeline of
/// the given role.
#[async_trait]
pub trait SessionEngine {
    async fn new_session(&self, role: Role) -> Result<Arc<dyn PeerSession + Send + Sync>>;
}
