use std::sync::atomic::{AtomicU64, Ordering};

use webrtc::{rtcp, rtp};

pub type RtpFilter = Box<dyn (Fn(&rtp::packet::Packet) -> bool) + Send + Sync>;
pub type RtcpFilter =
    Box<dyn (Fn(&[Box<dyn rtcp::packet::Packet + Send + Sync>]) -> bool) + Send + Sync>;

/// PacketDump logs the packets that pass its filters at debug level.
pub struct PacketDump {
    rtp_filter: RtpFilter,
    rtcp_filter: RtcpFilter,
    rtp_dumped: AtomicU64,
    rtcp_dumped: AtomicU64,
}

impl PacketDump {
    pub fn new(rtp_filter: RtpFilter, rtcp_filter: RtcpFilter) -> Self {
        PacketDump {
            rtp_filter,
            rtcp_filter,
            rtp_dumped: AtomicU64::new(0),
            rtcp_dumped: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        PacketDump::new(Box::new(|_| false), Box::new(|_| false))
    }

    /// rtcp_only filters out all RTP packets, only RTCP packets will be logged
    pub fn rtcp_only() -> Self {
        PacketDump::new(Box::new(|_| false), Box::new(|_| true))
    }

    pub fn dump_rtp(&self, pkt: &rtp::packet::Packet) {
        if (self.rtp_filter)(pkt) {
            self.rtp_dumped.fetch_add(1, Ordering::SeqCst);
            log::debug!(
                "rtp ssrc={} seq={} ts={} pt={} len={}",
                pkt.header.ssrc,
                pkt.header.sequence_number,
                pkt.header.timestamp,
                pkt.header.payload_type,
                pkt.payload.len()
            );
        }
    }

    pub fn dump_rtcp(&self, pkts: &[Box<dyn rtcp::packet::Packet + Send + Sync>]) {
        if pkts.is_empty() || !(self.rtcp_filter)(pkts) {
            return;
        }
        self.rtcp_dumped
            .fetch_add(pkts.len() as u64, Ordering::SeqCst);
        for pkt in pkts {
            log::debug!("rtcp {pkt}");
        }
    }

    pub fn rtp_dumped(&self) -> u64 {
        self.rtp_dumped.load(Ordering::SeqCst)
    }

    pub fn rtcp_dumped(&self) -> u64 {
        self.rtcp_dumped.load(Ordering::SeqCst)
    }
}
