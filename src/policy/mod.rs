
pub mod keyframe;
pub mod packet_dump;

use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::interceptor::registry::Registry;
use webrtc::interceptor::report::sender::SenderReport;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

pub use keyframe::run_keyframe_requests;
pub use packet_dump::PacketDump;

use crate::config::{CodecConfig, RelayConfig};
use crate::error::{Error, Result};
use crate::session::Role;

/// SessionPolicy is the set of per-session behaviours attached next to the
/// interceptor pipeline. None of them touch packet payloads.
pub struct SessionPolicy {
    /// cadence of picture loss indications sent to a publisher
    pub keyframe_interval: Option<Duration>,
    pub dump: PacketDump,
}

impl SessionPolicy {
    pub fn for_role(role: Role, config: &RelayConfig) -> Self {
        match role {
            Role::Publisher => SessionPolicy {
                keyframe_interval: config.keyframe_interval(),
                dump: PacketDump::disabled(),
            },
            Role::Subscriber => SessionPolicy {
                keyframe_interval: None,
                dump: PacketDump::rtcp_only(),
            },
        }
    }
}

/// codec_type derives the media kind from a mime type
pub fn codec_type(mime_type: &str) -> RTPCodecType {
    if mime_type.starts_with("audio/") {
        RTPCodecType::Audio
    } else if mime_type.starts_with("video/") {
        RTPCodecType::Video
    } else {
        RTPCodecType::Unspecified
    }
}

/// media_engine builds the codec set for a role. Publishers may only send
/// the relay codec; subscribers accept the default set so that any viewer
/// offer can be matched against the relay codec.
pub fn media_engine(role: Role, codec: &CodecConfig) -> Result<MediaEngine> {
    let mut m = MediaEngine::default();
    match role {
        Role::Publisher => {
            let typ = codec_type(&codec.mime_type);
            if typ == RTPCodecType::Unspecified {
                return Err(Error::ErrCodecUnsupported {
                    expected: "audio/* or video/*".to_owned(),
                    got: codec.mime_type.clone(),
                });
            }
            m.register_codec(codec.parameters(), typ)?;
        }
        Role::Subscriber => {
            m.register_default_codecs()?;
        }
    }
    Ok(m)
}

/// interceptor_registry builds the RTP/RTCP pipeline for a role: the
/// default set (NACK, reports) for publishers, sender reports for
/// subscribers.
pub fn interceptor_registry(role: Role, media_engine: &mut MediaEngine) -> Result<Registry> {
    let registry = match role {
        Role::Publisher => register_default_interceptors(Registry::new(), media_engine)?,
        Role::Subscriber => {
            let mut registry = Registry::new();
            registry.add(Box::new(SenderReport::builder()));
            registry
        }
    };
    Ok(registry)
}
