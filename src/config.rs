use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use webrtc::api::media_engine::MIME_TYPE_H264;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};

use crate::error::{Error, Result};

/// CodecConfig selects the single codec carried by the relay track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub payload_type: u8,
    pub sdp_fmtp_line: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: 90000,
            channels: 0,
            payload_type: 96,
            sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                .to_owned(),
        }
    }
}

impl CodecConfig {
    pub fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type.clone(),
            clock_rate: self.clock_rate,
            channels: self.channels,
            sdp_fmtp_line: self.sdp_fmtp_line.clone(),
            rtcp_feedback: vec![],
        }
    }

    pub fn parameters(&self) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: self.capability(),
            payload_type: self.payload_type,
            ..Default::default()
        }
    }
}

/// RelayConfig is the runtime configuration of the relay service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub ice_servers: Vec<String>,
    pub codec: CodecConfig,
    pub track_id: String,
    pub stream_id: String,
    pub gather_timeout_ms: u64,
    /// 0 disables periodic keyframe requests
    pub keyframe_interval_ms: u64,
    pub consumer_buffer: usize,
    pub max_forward_errors: u32,
    pub max_offer_bytes: usize,
    pub static_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
            codec: CodecConfig::default(),
            track_id: "video".to_owned(),
            stream_id: "webrtc-rs".to_owned(),
            gather_timeout_ms: 10_000,
            keyframe_interval_ms: 3_000,
            consumer_buffer: 256,
            max_forward_errors: 32,
            max_offer_bytes: 64 * 1024,
            static_dir: Some(PathBuf::from(".")),
        }
    }
}

impl RelayConfig {
    /// from_file loads a JSON config; absent fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gather_timeout_ms == 0 {
            return Err(Error::ErrInvalidConfig(
                "gather_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.consumer_buffer == 0 {
            return Err(Error::ErrInvalidConfig(
                "consumer_buffer must be positive".to_owned(),
            ));
        }
        if self.max_offer_bytes == 0 {
            return Err(Error::ErrInvalidConfig(
                "max_offer_bytes must be positive".to_owned(),
            ));
        }
        if !self.codec.mime_type.contains('/') {
            return Err(Error::ErrInvalidConfig(format!(
                "codec mime type {} is not of the form kind/name",
                self.codec.mime_type
            )));
        }
        Ok(())
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }

    pub fn keyframe_interval(&self) -> Option<Duration> {
        if self.keyframe_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.keyframe_interval_ms))
        }
    }
}
