use async_trait::async_trait;
use webrtc::rtp;

use crate::error::Result;

/// Writer accepts RTP packets on behalf of a consumer of media.
///
/// One writer task per instance is assumed; implementations are not required
/// to order concurrent calls. A packet is either fully accepted or rejected.
#[async_trait]
pub trait Writer {
    /// Add the content of an RTP packet to the media
    async fn write_rtp(&self, pkt: &rtp::packet::Packet) -> Result<()>;
    /// close the media
    /// Note: close implementation must be idempotent
    async fn close(&self) -> Result<()>;
}
