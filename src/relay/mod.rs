#[cfg(test)]
mod relay_test;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};

use crate::error::{Error, Result};
use crate::media::io::Writer;
use crate::policy::codec_type;

/// RelayStats is a point-in-time view of a relay track's counters.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RelayStats {
    /// packets accepted from the producer
    pub forwarded: u64,
    /// per-consumer deliveries skipped because that consumer's queue was full
    pub dropped: u64,
    pub consumers: usize,
}

/// RelayTrack is the in-memory fan-out point between one producer and any
/// number of consumers of a single media stream.
///
/// Consumers only see packets written after they registered. Each consumer
/// owns a bounded queue; a full queue drops the packet for that consumer and
/// never stalls the producer or the other consumers.
pub struct RelayTrack {
    codec: RTCRtpCodecCapability,
    id: String,
    stream_id: String,
    consumer_buffer: usize,

    next_id: AtomicU64,
    producer: Mutex<Option<u64>>,
    producer_codec: ArcSwapOption<RTCRtpCodecCapability>,
    consumers: Mutex<HashMap<u64, mpsc::Sender<rtp::packet::Packet>>>,

    closed: AtomicBool,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl RelayTrack {
    pub fn new(
        codec: RTCRtpCodecCapability,
        id: String,
        stream_id: String,
        consumer_buffer: usize,
    ) -> Arc<Self> {
        Arc::new(RelayTrack {
            codec,
            id,
            stream_id,
            consumer_buffer: consumer_buffer.max(1),
            next_id: AtomicU64::new(1),
            producer: Mutex::new(None),
            producer_codec: ArcSwapOption::empty(),
            consumers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// codec gets the codec capability the track was configured with
    pub fn codec(&self) -> &RTCRtpCodecCapability {
        &self.codec
    }

    /// id is the track label, e.g. 'video'
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    /// stream_id is the group the track belongs to
    pub fn stream_id(&self) -> &str {
        self.stream_id.as_str()
    }

    pub fn kind(&self) -> RTPCodecType {
        codec_type(&self.codec.mime_type)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// has_producer reports whether a producer currently holds the slot.
    pub fn has_producer(&self) -> bool {
        lock(&self.producer).is_some()
    }

    pub fn consumer_count(&self) -> usize {
        lock(&self.consumers).len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            forwarded: self.forwarded.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            consumers: self.consumer_count(),
        }
    }

    /// claim_producer takes the single producer slot. A second claim while
    /// the slot is held fails with ErrPublisherActive; the slot is released
    /// when the returned guard is dropped.
    pub fn claim_producer(self: &Arc<Self>) -> Result<ProducerGuard> {
        if self.is_closed() {
            return Err(Error::ErrSinkClosed);
        }

        let mut producer = lock(&self.producer);
        if producer.is_some() {
            return Err(Error::ErrPublisherActive);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        *producer = Some(id);
        log::debug!("relay track {} producer slot claimed by {}", self.id, id);

        Ok(ProducerGuard {
            relay: Arc::clone(self),
            id,
        })
    }

    fn release_producer(&self, id: u64) {
        let mut producer = lock(&self.producer);
        if *producer == Some(id) {
            *producer = None;
            self.producer_codec.store(None);
            log::debug!("relay track {} producer slot released by {}", self.id, id);
        }
    }

    /// register_consumer adds a consumer that receives every packet written
    /// from now on. Dropping the consumer deregisters it.
    pub fn register_consumer(self: &Arc<Self>) -> Result<RelayConsumer> {
        if self.is_closed() {
            return Err(Error::ErrSinkClosed);
        }

        let (tx, rx) = mpsc::channel(self.consumer_buffer);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut consumers = lock(&self.consumers);
            consumers.insert(id, tx);
            log::debug!(
                "relay track {} registered consumer {}, total {}",
                self.id,
                id,
                consumers.len()
            );
        }

        Ok(RelayConsumer {
            id,
            rx,
            relay: Arc::downgrade(self),
        })
    }

    /// deregister_consumer removes a consumer; unknown ids are ignored.
    pub fn deregister_consumer(&self, id: u64) {
        let mut consumers = lock(&self.consumers);
        if consumers.remove(&id).is_some() {
            // bound retained capacity under consumer churn
            if consumers.capacity() > 64 && consumers.len() < consumers.capacity() / 4 {
                consumers.shrink_to_fit();
            }
            log::debug!(
                "relay track {} deregistered consumer {}, total {}",
                self.id,
                id,
                consumers.len()
            );
        }
    }

    fn fan_out(&self, pkt: &rtp::packet::Packet) {
        let mut consumers = lock(&self.consumers);
        let mut gone = vec![];
        for (id, tx) in consumers.iter() {
            match tx.try_send(pkt.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::SeqCst);
                    log::trace!(
                        "relay track {} consumer {} full, dropping seq {}",
                        self.id,
                        id,
                        pkt.header.sequence_number
                    );
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            consumers.remove(&id);
            log::debug!("relay track {} pruned closed consumer {}", self.id, id);
        }
    }
}

#[async_trait]
impl Writer for RelayTrack {
    /// write_rtp fans one packet out to every registered consumer. A consumer
    /// that is full or gone does not fail the write.
    async fn write_rtp(&self, pkt: &rtp::packet::Packet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ErrSinkClosed);
        }
        if self.producer_codec.load().is_none() {
            return Err(Error::ErrRelayUnavailable);
        }

        self.forwarded.fetch_add(1, Ordering::SeqCst);
        self.fan_out(pkt);

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.producer_codec.store(None);
        lock(&self.consumers).clear();
        log::info!("relay track {} closed", self.id);

        Ok(())
    }
}

/// ProducerGuard holds a relay track's producer slot.
pub struct ProducerGuard {
    relay: Arc<RelayTrack>,
    id: u64,
}

impl ProducerGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn relay(&self) -> &Arc<RelayTrack> {
        &self.relay
    }

    /// bind_codec records the producer's negotiated codec. Writes to the
    /// relay fail until a codec matching the track's is bound.
    pub fn bind_codec(&self, codec: &RTCRtpCodecCapability) -> Result<()> {
        if !codec_matches(&self.relay.codec, codec) {
            return Err(Error::ErrCodecUnsupported {
                expected: self.relay.codec.mime_type.clone(),
                got: codec.mime_type.clone(),
            });
        }

        if *lock(&self.relay.producer) != Some(self.id) {
            return Err(Error::ErrRelayUnavailable);
        }
        self.relay.producer_codec.store(Some(Arc::new(codec.clone())));
        log::info!(
            "relay track {} bound producer {} with codec {}",
            self.relay.id,
            self.id,
            codec.mime_type
        );

        Ok(())
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.relay.release_producer(self.id);
    }
}

/// RelayConsumer receives the packets fanned out by a relay track.
pub struct RelayConsumer {
    id: u64,
    rx: mpsc::Receiver<rtp::packet::Packet>,
    relay: Weak<RelayTrack>,
}

impl RelayConsumer {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// relay_stats reads the counters of the track this consumer is
    /// registered on; None once the track is gone.
    pub fn relay_stats(&self) -> Option<RelayStats> {
        self.relay.upgrade().map(|relay| relay.stats())
    }

    /// recv waits for the next packet; None once the consumer is
    /// deregistered or the track is closed.
    pub async fn recv(&mut self) -> Option<rtp::packet::Packet> {
        self.rx.recv().await
    }
}

impl Drop for RelayConsumer {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.upgrade() {
            relay.deregister_consumer(self.id);
        }
    }
}

/// codec_matches compares codecs by mime type, case insensitively
pub(crate) fn codec_matches(a: &RTCRtpCodecCapability, b: &RTCRtpCodecCapability) -> bool {
    a.mime_type.eq_ignore_ascii_case(&b.mime_type)
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
