use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::*;
use crate::config::{CodecConfig, RelayConfig};
use crate::error::Error;
use crate::policy;

/// RtcEngine creates peer connections on the WebRTC.rs stack, one API
/// object per session so that each gets its own interceptor pipeline.
pub struct RtcEngine {
    ice_servers: Vec<String>,
    codec: CodecConfig,
}

impl RtcEngine {
    pub fn new(config: &RelayConfig) -> Self {
        RtcEngine {
            ice_servers: config.ice_servers.clone(),
            codec: config.codec.clone(),
        }
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SessionEngine for RtcEngine {
    async fn new_session(&self, role: Role) -> Result<Arc<dyn PeerSession + Send + Sync>> {
        let mut media_engine = policy::media_engine(role, &self.codec)?;
        let registry = policy::interceptor_registry(role, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(api.new_peer_connection(self.configuration()).await?);

        let (state_tx, state_rx) = watch::channel(ConnectivityState::New);
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                log::info!("{role} ICE connection state has changed: {s}");
                let _ = state_tx.send(ConnectivityState::from(s));
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(RtcPeerSession {
            role,
            peer_connection,
            state_rx,
        }))
    }
}

struct RtcPeerSession {
    role: Role,
    peer_connection: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<ConnectivityState>,
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn set_remote_description(&self, sdp: String) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|err| Error::ErrMalformedOffer(err.to_string()))?;
        // engine rejections of the offer are caller errors
        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|err| Error::ErrMalformedOffer(err.to_string()))?;
        Ok(())
    }

    async fn gathering_complete_promise(&self) -> mpsc::Receiver<()> {
        self.peer_connection.gathering_complete_promise().await
    }

    async fn create_local_description(&self) -> Result<()> {
        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.peer_connection
            .local_description()
            .await
            .map(|desc| desc.sdp)
    }

    async fn accept_inbound(&self) -> Result<mpsc::Receiver<InboundMedia>> {
        self.peer_connection
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;

        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMedia>(1);
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, receiver: Arc<RTCRtpReceiver>, _| {
                let media = InboundMedia {
                    codec: track.codec().capability,
                    ssrc: track.ssrc(),
                    packets: Arc::new(RemoteTrackReader { track }),
                    feedback: Arc::new(ReceiverFeedback { receiver }),
                };
                let inbound_tx = inbound_tx.clone();
                Box::pin(async move {
                    if inbound_tx.send(media).await.is_err() {
                        log::debug!("inbound track arrived after publisher session ended");
                    }
                })
            },
        ));

        Ok(inbound_rx)
    }

    async fn attach_outbound(&self, relay: &RelayTrack) -> Result<OutboundMedia> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            relay.codec().clone(),
            relay.id().to_owned(),
            relay.stream_id().to_owned(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        Ok(OutboundMedia {
            sink: Arc::new(LocalTrackSink::new(track)),
            feedback: Arc::new(SenderFeedback { sender }),
        })
    }

    async fn request_keyframe(&self, media_ssrc: u32) -> Result<()> {
        self.peer_connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await?;
        Ok(())
    }

    fn connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state_rx.clone()
    }

    async fn close(&self) -> Result<()> {
        log::debug!("closing {} peer connection", self.role);
        self.peer_connection.close().await?;
        Ok(())
    }
}

struct RemoteTrackReader {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl PacketReader for RemoteTrackReader {
    async fn read_rtp(&self) -> Result<rtp::packet::Packet> {
        let (pkt, _) = self.track.read_rtp().await?;
        Ok(pkt)
    }
}

struct ReceiverFeedback {
    receiver: Arc<RTCRtpReceiver>,
}

#[async_trait]
impl FeedbackReader for ReceiverFeedback {
    async fn read_rtcp(&self) -> Result<RtcpPackets> {
        let (pkts, _) = self.receiver.read_rtcp().await?;
        Ok(pkts)
    }
}

struct SenderFeedback {
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl FeedbackReader for SenderFeedback {
    async fn read_rtcp(&self) -> Result<RtcpPackets> {
        let (pkts, _) = self.sender.read_rtcp().await?;
        Ok(pkts)
    }
}

/// LocalTrackSink adapts a subscriber's local track to the packet Writer.
pub(crate) struct LocalTrackSink {
    track: Arc<TrackLocalStaticRTP>,
    closed: AtomicBool,
}

impl LocalTrackSink {
    pub(crate) fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        LocalTrackSink {
            track,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Writer for LocalTrackSink {
    async fn write_rtp(&self, pkt: &rtp::packet::Packet) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrSinkClosed);
        }
        match self.track.write_rtp(pkt).await {
            Ok(_) => Ok(()),
            // not bound to a transport yet
            Err(webrtc::Error::ErrClosedPipe) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use webrtc::api::media_engine::MIME_TYPE_H264;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

    #[tokio::test]
    async fn test_local_track_sink_close_idempotent() {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "webrtc-rs".to_owned(),
        ));
        let sink = LocalTrackSink::new(track);
        let pkt = rtp::packet::Packet {
            payload: Bytes::from_static(&[0x01]),
            ..Default::default()
        };

        // unbound tracks accept and discard
        assert!(sink.write_rtp(&pkt).await.is_ok());

        assert!(sink.close().await.is_ok());
        assert!(sink.close().await.is_ok());
        assert!(matches!(
            sink.write_rtp(&pkt).await,
            Err(Error::ErrSinkClosed)
        ));
    }
}
