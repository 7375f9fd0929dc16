use std::fmt;

use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

/// ConnectivityState is the transport connectivity of one session, as
/// reported by the engine after negotiation.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectivityState {
    #[default]
    Unspecified,

    /// New indicates connectivity checks have not started.
    New,

    /// Checking indicates at least one candidate pair is being checked.
    Checking,

    /// Connected indicates a usable candidate pair was found.
    Connected,

    /// Completed indicates checks finished with a usable pair.
    Completed,

    /// Disconnected indicates liveness checks are failing; this may recover.
    Disconnected,

    /// Failed indicates connectivity was lost for good.
    Failed,

    /// Closed indicates the session's transport was shut down.
    Closed,
}

const CONNECTIVITY_STATE_NEW_STR: &str = "new";
const CONNECTIVITY_STATE_CHECKING_STR: &str = "checking";
const CONNECTIVITY_STATE_CONNECTED_STR: &str = "connected";
const CONNECTIVITY_STATE_COMPLETED_STR: &str = "completed";
const CONNECTIVITY_STATE_DISCONNECTED_STR: &str = "disconnected";
const CONNECTIVITY_STATE_FAILED_STR: &str = "failed";
const CONNECTIVITY_STATE_CLOSED_STR: &str = "closed";

impl ConnectivityState {
    /// is_terminal is true once the session can no longer carry media.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectivityState::Failed | ConnectivityState::Closed)
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Connected | ConnectivityState::Completed
        )
    }
}

impl From<&str> for ConnectivityState {
    fn from(raw: &str) -> Self {
        match raw {
            CONNECTIVITY_STATE_NEW_STR => ConnectivityState::New,
            CONNECTIVITY_STATE_CHECKING_STR => ConnectivityState::Checking,
            CONNECTIVITY_STATE_CONNECTED_STR => ConnectivityState::Connected,
            CONNECTIVITY_STATE_COMPLETED_STR => ConnectivityState::Completed,
            CONNECTIVITY_STATE_DISCONNECTED_STR => ConnectivityState::Disconnected,
            CONNECTIVITY_STATE_FAILED_STR => ConnectivityState::Failed,
            CONNECTIVITY_STATE_CLOSED_STR => ConnectivityState::Closed,
            _ => ConnectivityState::Unspecified,
        }
    }
}

impl From<RTCIceConnectionState> for ConnectivityState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::New => ConnectivityState::New,
            RTCIceConnectionState::Checking => ConnectivityState::Checking,
            RTCIceConnectionState::Connected => ConnectivityState::Connected,
            RTCIceConnectionState::Completed => ConnectivityState::Completed,
            RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCIceConnectionState::Failed => ConnectivityState::Failed,
            RTCIceConnectionState::Closed => ConnectivityState::Closed,
            _ => ConnectivityState::Unspecified,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ConnectivityState::New => CONNECTIVITY_STATE_NEW_STR,
            ConnectivityState::Checking => CONNECTIVITY_STATE_CHECKING_STR,
            ConnectivityState::Connected => CONNECTIVITY_STATE_CONNECTED_STR,
            ConnectivityState::Completed => CONNECTIVITY_STATE_COMPLETED_STR,
            ConnectivityState::Disconnected => CONNECTIVITY_STATE_DISCONNECTED_STR,
            ConnectivityState::Failed => CONNECTIVITY_STATE_FAILED_STR,
            ConnectivityState::Closed => CONNECTIVITY_STATE_CLOSED_STR,
            ConnectivityState::Unspecified => crate::UNSPECIFIED_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_connectivity_state() {
        let tests = vec![
            ("Unspecified", ConnectivityState::Unspecified),
            ("new", ConnectivityState::New),
            ("checking", ConnectivityState::Checking),
            ("connected", ConnectivityState::Connected),
            ("completed", ConnectivityState::Completed),
            ("disconnected", ConnectivityState::Disconnected),
            ("failed", ConnectivityState::Failed),
            ("closed", ConnectivityState::Closed),
        ];

        for (state_string, expected_state) in tests {
            assert_eq!(ConnectivityState::from(state_string), expected_state);
            if expected_state != ConnectivityState::Unspecified {
                assert_eq!(expected_state.to_string(), state_string);
            }
        }
    }

    #[test]
    fn test_connectivity_state_from_ice() {
        let tests = vec![
            (RTCIceConnectionState::Unspecified, ConnectivityState::Unspecified),
            (RTCIceConnectionState::New, ConnectivityState::New),
            (RTCIceConnectionState::Checking, ConnectivityState::Checking),
            (RTCIceConnectionState::Connected, ConnectivityState::Connected),
            (RTCIceConnectionState::Completed, ConnectivityState::Completed),
            (
                RTCIceConnectionState::Disconnected,
                ConnectivityState::Disconnected,
            ),
            (RTCIceConnectionState::Failed, ConnectivityState::Failed),
            (RTCIceConnectionState::Closed, ConnectivityState::Closed),
        ];

        for (ice_state, expected_state) in tests {
            assert_eq!(ConnectivityState::from(ice_state), expected_state);
        }
    }

    #[test]
    fn test_connectivity_state_terminal() {
        assert!(ConnectivityState::Failed.is_terminal());
        assert!(ConnectivityState::Closed.is_terminal());
        assert!(!ConnectivityState::Disconnected.is_terminal());
        assert!(!ConnectivityState::Connected.is_terminal());
        assert!(ConnectivityState::Completed.is_connected());
    }
}
