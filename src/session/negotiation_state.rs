use std::fmt;

use tokio::sync::watch;

use crate::error::{Error, Result};

/// NegotiationState is the signaling progress of one session.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    #[default]
    Unspecified,

    /// Created indicates the session exists but no offer was applied.
    Created,

    /// RemoteDescriptionSet indicates the offer was parsed and applied.
    RemoteDescriptionSet,

    /// LocalDescriptionCreated indicates the answer was created and applied
    /// locally, which starts candidate gathering.
    LocalDescriptionCreated,

    /// CandidateGatheringInFlight indicates the negotiator is waiting for
    /// gathering to complete.
    CandidateGatheringInFlight,

    /// Answered indicates the complete answer was handed to the caller.
    Answered,

    /// Connected indicates the transport reported connectivity.
    Connected,

    /// Failed indicates negotiation or the transport failed.
    Failed,

    /// Closed indicates the session was torn down.
    Closed,
}

const NEGOTIATION_STATE_CREATED_STR: &str = "created";
const NEGOTIATION_STATE_REMOTE_DESCRIPTION_SET_STR: &str = "remote-description-set";
const NEGOTIATION_STATE_LOCAL_DESCRIPTION_CREATED_STR: &str = "local-description-created";
const NEGOTIATION_STATE_CANDIDATE_GATHERING_IN_FLIGHT_STR: &str = "candidate-gathering";
const NEGOTIATION_STATE_ANSWERED_STR: &str = "answered";
const NEGOTIATION_STATE_CONNECTED_STR: &str = "connected";
const NEGOTIATION_STATE_FAILED_STR: &str = "failed";
const NEGOTIATION_STATE_CLOSED_STR: &str = "closed";

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// can_transition_to reports whether `next` directly follows this state.
    /// Failed and Closed are reachable from every state that is not itself
    /// terminal.
    pub fn can_transition_to(&self, next: NegotiationState) -> bool {
        use NegotiationState::*;

        match (*self, next) {
            (Unspecified, _) => false,
            (from, Failed | Closed) => !from.is_terminal(),
            (Created, RemoteDescriptionSet)
            | (RemoteDescriptionSet, LocalDescriptionCreated)
            | (LocalDescriptionCreated, CandidateGatheringInFlight)
            | (CandidateGatheringInFlight, Answered)
            | (Answered, Connected) => true,
            _ => false,
        }
    }
}

impl From<&str> for NegotiationState {
    fn from(raw: &str) -> Self {
        match raw {
            NEGOTIATION_STATE_CREATED_STR => NegotiationState::Created,
            NEGOTIATION_STATE_REMOTE_DESCRIPTION_SET_STR => NegotiationState::RemoteDescriptionSet,
            NEGOTIATION_STATE_LOCAL_DESCRIPTION_CREATED_STR => {
                NegotiationState::LocalDescriptionCreated
            }
            NEGOTIATION_STATE_CANDIDATE_GATHERING_IN_FLIGHT_STR => {
                NegotiationState::CandidateGatheringInFlight
            }
            NEGOTIATION_STATE_ANSWERED_STR => NegotiationState::Answered,
            NEGOTIATION_STATE_CONNECTED_STR => NegotiationState::Connected,
            NEGOTIATION_STATE_FAILED_STR => NegotiationState::Failed,
            NEGOTIATION_STATE_CLOSED_STR => NegotiationState::Closed,
            _ => NegotiationState::Unspecified,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            NegotiationState::Created => NEGOTIATION_STATE_CREATED_STR,
            NegotiationState::RemoteDescriptionSet => NEGOTIATION_STATE_REMOTE_DESCRIPTION_SET_STR,
            NegotiationState::LocalDescriptionCreated => {
                NEGOTIATION_STATE_LOCAL_DESCRIPTION_CREATED_STR
            }
            NegotiationState::CandidateGatheringInFlight => {
                NEGOTIATION_STATE_CANDIDATE_GATHERING_IN_FLIGHT_STR
            }
            NegotiationState::Answered => NEGOTIATION_STATE_ANSWERED_STR,
            NegotiationState::Connected => NEGOTIATION_STATE_CONNECTED_STR,
            NegotiationState::Failed => NEGOTIATION_STATE_FAILED_STR,
            NegotiationState::Closed => NEGOTIATION_STATE_CLOSED_STR,
            NegotiationState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

/// StateMachine holds a session's NegotiationState and publishes every
/// change to its subscribers.
pub struct StateMachine {
    tx: watch::Sender<NegotiationState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(NegotiationState::Created);
        StateMachine { tx }
    }

    pub fn current(&self) -> NegotiationState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.tx.subscribe()
    }

    /// transition moves to `next`, or fails with ErrInvalidStateTransition
    /// leaving the state unchanged.
    pub fn transition(&self, next: NegotiationState) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                log::trace!("negotiation state {} -> {}", *state, next);
                *state = next;
                true
            } else {
                result = Err(Error::ErrInvalidStateTransition { from: *state, to: next });
                false
            }
        });
        result
    }

    /// finish moves to a terminal state unless one was already reached.
    pub(crate) fn finish(&self, terminal: NegotiationState) {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = terminal;
                true
            }
        });
    }
}
