
pub mod io;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::{Bytes, BytesMut};
use webrtc::rtp;

use crate::error::{Error, Result};

/// A Sample contains encoded media and timing information
#[derive(Clone)]
pub struct Sample {
    pub data: Bytes,
    pub timestamp: SystemTime,
    pub duration: Duration,
    pub packet_timestamp: u32,
    pub prev_dropped_packets: u16,
    pub metadata: Option<Arc<dyn Any + Send + Sync>>,

    /// RTP headers of the packets forming this Sample, in arrival order.
    /// Empty unless the producer tracks them; useful for reading header
    /// extensions associated to the Sample.
    pub rtp_headers: Vec<rtp::header::Header>,
}

impl Default for Sample {
    fn default() -> Self {
        Sample {
            data: Bytes::new(),
            timestamp: SystemTime::now(),
            duration: Duration::from_secs(0),
            packet_timestamp: 0,
            prev_dropped_packets: 0,
            metadata: None,
            rtp_headers: vec![],
        }
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("data", &self.data.len())
            .field("timestamp", &self.timestamp)
            .field("duration", &self.duration)
            .field("packet_timestamp", &self.packet_timestamp)
            .field("prev_dropped_packets", &self.prev_dropped_packets)
            .field("metadata", &self.metadata.is_some())
            .field("rtp_headers", &self.rtp_headers.len())
            .finish()
    }
}

impl Sample {
    /// from_packets assembles one Sample out of a run of RTP packets that
    /// share a media frame. Payloads are concatenated and headers kept in the
    /// order the packets are given. A run that carries no payload at all is
    /// rejected.
    pub fn from_packets(
        packets: &[rtp::packet::Packet],
        duration: Duration,
        prev_dropped_packets: u16,
    ) -> Result<Self> {
        let size: usize = packets.iter().map(|p| p.payload.len()).sum();
        if size == 0 {
            return Err(Error::ErrEmptySample);
        }

        let mut data = BytesMut::with_capacity(size);
        let mut rtp_headers = Vec::with_capacity(packets.len());
        for p in packets {
            data.extend_from_slice(&p.payload);
            rtp_headers.push(p.header.clone());
        }

        Ok(Sample {
            data: data.freeze(),
            timestamp: SystemTime::now(),
            duration,
            packet_timestamp: packets[0].header.timestamp,
            prev_dropped_packets,
            metadata: None,
            rtp_headers,
        })
    }

    /// with_metadata attaches opaque application data to the Sample.
    pub fn with_metadata(mut self, metadata: Arc<dyn Any + Send + Sync>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
