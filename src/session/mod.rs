
pub mod negotiation_state;
pub mod negotiator;
mod publisher;
pub mod registry;
mod subscriber;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch, Mutex};
use waitgroup::WaitGroup;

pub use negotiation_state::{NegotiationState, StateMachine};
pub use negotiator::{Answer, Negotiator};
pub use registry::SessionRegistry;

use crate::engine::{ConnectivityState, PeerSession};
use crate::error::{Error, Result};

pub type SessionId = u64;

/// Role selects which side of the relay a session feeds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Publisher ingests media over WHIP
    Publisher,
    /// Subscriber egresses media over WHEP
    Subscriber,
}

const ROLE_PUBLISHER_STR: &str = "publisher";
const ROLE_SUBSCRIBER_STR: &str = "subscriber";

impl Role {
    /// location is the path returned in the Location header of an answer.
    pub fn location(&self) -> &'static str {
        match self {
            Role::Publisher => "/whip",
            Role::Subscriber => "/whep",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Role::Publisher => ROLE_PUBLISHER_STR,
            Role::Subscriber => ROLE_SUBSCRIBER_STR,
        };
        write!(f, "{s}")
    }
}

/// TaskSet spawns the background tasks of one session. Every task is
/// tracked by the session's wait group and observes the same close signal.
#[derive(Clone)]
pub(crate) struct TaskSet {
    wg: Arc<Mutex<Option<WaitGroup>>>,
    close_rx: watch::Receiver<()>,
    done_tx: mpsc::Sender<Error>,
}

impl TaskSet {
    /// spawn runs `task` unless the session already started closing.
    pub(crate) async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut w = {
            let wait_group = self.wg.lock().await;
            wait_group.as_ref().map(|wg| wg.worker())
        };
        if w.is_none() {
            return;
        }
        tokio::spawn(async move {
            let _d = w.take();
            task.await;
        });
    }

    /// close_rx errors on `changed()` once the session closes.
    pub(crate) fn close_rx(&self) -> watch::Receiver<()> {
        self.close_rx.clone()
    }

    /// report hands a terminal task error to the session supervisor.
    pub(crate) fn report(&self, err: Error) {
        if self.done_tx.try_send(err).is_err() {
            log::trace!("session already ending, dropped task report");
        }
    }
}

/// Session is one answered publisher or subscriber negotiation together
/// with the tasks that move its media.
pub struct Session {
    id: SessionId,
    role: Role,
    state: StateMachine,
    peer: Arc<dyn PeerSession + Send + Sync>,
    registry: Weak<SessionRegistry>,

    tasks: TaskSet,
    done_rx: Mutex<Option<mpsc::Receiver<Error>>>,
    close_tx: Mutex<Option<watch::Sender<()>>>,
    closed: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        role: Role,
        state: StateMachine,
        peer: Arc<dyn PeerSession + Send + Sync>,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let (close_tx, close_rx) = watch::channel(());
        let (done_tx, done_rx) = mpsc::channel(8);

        Arc::new(Session {
            id,
            role,
            state,
            peer,
            registry,
            tasks: TaskSet {
                wg: Arc::new(Mutex::new(Some(WaitGroup::new()))),
                close_rx,
                done_tx,
            },
            done_rx: Mutex::new(Some(done_rx)),
            close_tx: Mutex::new(Some(close_tx)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn tasks(&self) -> TaskSet {
        self.tasks.clone()
    }

    /// start spawns the supervisor, which tears the session down when the
    /// transport reaches a terminal state or a media task gives up.
    pub(crate) async fn start(self: &Arc<Self>) {
        let done_rx = self.done_rx.lock().await.take();
        if let Some(done_rx) = done_rx {
            let session = Arc::clone(self);
            tokio::spawn(async move {
                session.supervise(done_rx).await;
            });
        }
    }

    async fn supervise(self: Arc<Self>, mut done_rx: mpsc::Receiver<Error>) {
        let mut close_rx = self.tasks.close_rx();
        let mut connectivity_rx = self.peer.connectivity();

        loop {
            let connectivity = *connectivity_rx.borrow_and_update();
            match connectivity {
                ConnectivityState::Failed => {
                    log::warn!(
                        "{} session {} connectivity failed, tearing down",
                        self.role,
                        self.id
                    );
                    self.teardown(NegotiationState::Failed).await;
                    return;
                }
                ConnectivityState::Closed => {
                    self.teardown(NegotiationState::Closed).await;
                    return;
                }
                s if s.is_connected() && self.state() == NegotiationState::Answered => {
                    if let Err(err) = self.state.transition(NegotiationState::Connected) {
                        log::debug!("{} session {}: {}", self.role, self.id, err);
                    }
                    log::info!("{} session {} connected", self.role, self.id);
                }
                _ => {}
            }

            tokio::select! {
                changed = connectivity_rx.changed() => {
                    if changed.is_err() {
                        log::warn!(
                            "{} session {} lost its connectivity notifications",
                            self.role,
                            self.id
                        );
                        self.teardown(NegotiationState::Failed).await;
                        return;
                    }
                }
                Some(err) = done_rx.recv() => {
                    log::warn!("{} session {} ended: {}", self.role, self.id, err);
                    self.teardown(NegotiationState::Failed).await;
                    return;
                }
                _ = close_rx.changed() => {
                    return;
                }
            }
        }
    }

    /// close tears the session down: it stops every task, closes the
    /// transport and removes the session from its registry. Calling it again
    /// is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.shutdown(NegotiationState::Closed).await
    }

    async fn teardown(&self, terminal: NegotiationState) {
        if let Err(err) = self.shutdown(terminal).await {
            log::warn!("{} session {} teardown: {}", self.role, self.id, err);
        }
    }

    async fn shutdown(&self, terminal: NegotiationState) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        log::info!("closing {} session {}", self.role, self.id);

        {
            let mut close_tx = self.close_tx.lock().await;
            close_tx.take();
        }

        let result = self.peer.close().await;

        let wg = {
            let mut wg = self.tasks.wg.lock().await;
            wg.take()
        };
        if let Some(wg) = wg {
            wg.wait().await;
        }

        self.state.finish(terminal);
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id).await;
        }
        log::info!("{} session {} is {}", self.role, self.id, self.state());

        result
    }
}
