use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::*;
use crate::config::RelayConfig;
use crate::engine::{InboundMedia, OutboundMedia, SessionEngine};
use crate::policy::SessionPolicy;
use crate::relay::{ProducerGuard, RelayConsumer, RelayTrack};

/// Answer is the result of a completed negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// the local description, listing every gathered candidate
    pub sdp: String,
    pub location: &'static str,
    pub session_id: SessionId,
}

enum Wiring {
    Publisher {
        guard: ProducerGuard,
        inbound_rx: mpsc::Receiver<InboundMedia>,
    },
    Subscriber {
        consumer: RelayConsumer,
        outbound: OutboundMedia,
    },
}

enum Slot {
    Producer(ProducerGuard),
    Consumer(RelayConsumer),
}

/// Negotiator runs single-shot offer/answer exchanges against one relay
/// track. Each call builds a fresh engine session; there are no retries and
/// no signaling after the answer is returned.
pub struct Negotiator {
    engine: Arc<dyn SessionEngine + Send + Sync>,
    relay: Arc<RelayTrack>,
    registry: Arc<SessionRegistry>,
    config: RelayConfig,
    next_id: AtomicU64,
}

impl Negotiator {
    pub fn new(
        engine: Arc<dyn SessionEngine + Send + Sync>,
        relay: Arc<RelayTrack>,
        registry: Arc<SessionRegistry>,
        config: RelayConfig,
    ) -> Self {
        Negotiator {
            engine,
            relay,
            registry,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn relay(&self) -> &Arc<RelayTrack> {
        &self.relay
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// negotiate applies `raw_offer` for `role` and returns the answer once
    /// candidate gathering is complete. On error nothing stays behind: the
    /// engine session is closed and any relay slot is released.
    pub async fn negotiate(&self, role: Role, raw_offer: &str) -> Result<Answer> {
        let trimmed = raw_offer.trim_start();
        if trimmed.trim_end().is_empty() {
            return Err(Error::ErrEmptyOffer);
        }
        // a session description always opens with its version line
        if !trimmed.starts_with("v=") {
            return Err(Error::ErrMalformedOffer(
                "session description must start with v=".to_owned(),
            ));
        }

        let slot = match role {
            Role::Publisher => Slot::Producer(self.relay.claim_producer()?),
            Role::Subscriber => Slot::Consumer(self.relay.register_consumer()?),
        };

        let peer = self.engine.new_session(role).await?;
        let state = StateMachine::new();

        let (sdp, wiring) = match self
            .exchange(raw_offer.to_owned(), &peer, &state, slot)
            .await
        {
            Ok(answered) => answered,
            Err(err) => {
                log::warn!("{role} negotiation failed in state {}: {err}", state.current());
                state.finish(NegotiationState::Failed);
                if let Err(close_err) = peer.close().await {
                    log::warn!("closing failed {role} session: {close_err}");
                }
                return Err(err);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(
            id,
            role,
            state,
            Arc::clone(&peer),
            Arc::downgrade(&self.registry),
        );
        self.registry.insert(Arc::clone(&session)).await;

        let policy = Arc::new(SessionPolicy::for_role(role, &self.config));
        match wiring {
            Wiring::Publisher { guard, inbound_rx } => {
                publisher::spawn(
                    session.tasks(),
                    guard,
                    inbound_rx,
                    peer,
                    policy,
                    self.config.max_forward_errors,
                )
                .await;
            }
            Wiring::Subscriber { consumer, outbound } => {
                subscriber::spawn(
                    session.tasks(),
                    consumer,
                    outbound,
                    policy,
                    self.config.max_forward_errors,
                )
                .await;
            }
        }
        session.start().await;

        log::info!("{role} session {id} answered");
        Ok(Answer {
            sdp,
            location: role.location(),
            session_id: id,
        })
    }

    async fn exchange(
        &self,
        offer: String,
        peer: &Arc<dyn PeerSession + Send + Sync>,
        state: &StateMachine,
        slot: Slot,
    ) -> Result<(String, Wiring)> {
        let wiring = match slot {
            Slot::Producer(guard) => Wiring::Publisher {
                guard,
                inbound_rx: peer.accept_inbound().await?,
            },
            Slot::Consumer(consumer) => Wiring::Subscriber {
                consumer,
                outbound: peer.attach_outbound(&self.relay).await?,
            },
        };

        peer.set_remote_description(offer).await?;
        state.transition(NegotiationState::RemoteDescriptionSet)?;

        let mut gather_complete = peer.gathering_complete_promise().await;
        peer.create_local_description().await?;
        state.transition(NegotiationState::LocalDescriptionCreated)?;

        state.transition(NegotiationState::CandidateGatheringInFlight)?;
        let timeout = self.config.gather_timeout();
        if tokio::time::timeout(timeout, gather_complete.recv())
            .await
            .is_err()
        {
            return Err(Error::ErrGatheringTimeout(timeout));
        }
        // a transport closed while gathering also resolves the promise
        let aborted = peer.connectivity().borrow().is_terminal();
        if aborted {
            return Err(Error::ErrGatheringAborted);
        }

        let sdp = peer
            .local_description()
            .await
            .ok_or(Error::ErrNoLocalDescription)?;
        state.transition(NegotiationState::Answered)?;

        Ok((sdp, wiring))
    }
}
