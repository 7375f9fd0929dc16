use std::fmt;
use std::io;

use hyper::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// ErrMalformedOffer indicates the offer body could not be parsed as a
    /// session description.
    #[error("malformed offer: {0}")]
    ErrMalformedOffer(String),

    /// ErrEmptyOffer indicates the offer body was empty or whitespace only.
    #[error("offer is empty")]
    ErrEmptyOffer,

    /// ErrOfferTooLarge indicates the offer body exceeded the configured cap.
    #[error("offer of {size} bytes exceeds limit of {limit} bytes")]
    ErrOfferTooLarge { size: usize, limit: usize },

    /// ErrCodecUnsupported indicates the remote track codec does not match the
    /// codec configured on the relay track.
    #[error("codec {got} not supported, relay track expects {expected}")]
    ErrCodecUnsupported { expected: String, got: String },

    /// ErrNoLocalDescription indicates the engine produced no local description
    /// after the answer was applied.
    #[error("local description is not available")]
    ErrNoLocalDescription,

    /// ErrGatheringTimeout indicates candidate gathering did not complete within
    /// the configured bound.
    #[error("candidate gathering did not complete within {0:?}")]
    ErrGatheringTimeout(std::time::Duration),

    /// ErrGatheringAborted indicates the gathering-complete signal was dropped
    /// before it fired.
    #[error("candidate gathering aborted")]
    ErrGatheringAborted,

    /// ErrInvalidStateTransition indicates a negotiation step ran out of order.
    #[error("invalid negotiation state transition from {from} to {to}")]
    ErrInvalidStateTransition {
        from: crate::session::NegotiationState,
        to: crate::session::NegotiationState,
    },

    /// ErrConnectivityFailed indicates the transport failed after negotiation.
    #[error("connectivity failed")]
    ErrConnectivityFailed,

    /// ErrRelayUnavailable indicates a write to a relay track that has no
    /// producer bound to it.
    #[error("relay track has no producer")]
    ErrRelayUnavailable,

    /// ErrPublisherActive indicates the relay track producer slot is already held.
    #[error("a publisher is already active on this track")]
    ErrPublisherActive,

    /// ErrSinkClosed indicates a write to a sink that was already closed.
    #[error("sink closed")]
    ErrSinkClosed,

    /// ErrSourceClosed indicates a read from an inbound packet or feedback
    /// source that has ended.
    #[error("source closed")]
    ErrSourceClosed,

    /// ErrEmptySample indicates a sample was assembled without any payload.
    #[error("sample has no payload")]
    ErrEmptySample,

    #[error("invalid config: {0}")]
    ErrInvalidConfig(String),

    #[error("{0}")]
    WebRTC(#[from] webrtc::Error),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Hyper(#[from] hyper::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// ErrorKind is the coarse classification surfaced to HTTP callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedOffer,
    CodecUnsupported,
    NegotiationFailed,
    ConnectivityFailed,
    RelayUnavailable,
    SinkClosed,
    PublisherActive,
    InvalidState,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ErrorKind::MalformedOffer => "MalformedOffer",
            ErrorKind::CodecUnsupported => "CodecUnsupported",
            ErrorKind::NegotiationFailed => "NegotiationFailed",
            ErrorKind::ConnectivityFailed => "ConnectivityFailed",
            ErrorKind::RelayUnavailable => "RelayUnavailable",
            ErrorKind::SinkClosed => "SinkClosed",
            ErrorKind::PublisherActive => "PublisherActive",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::Internal => "Internal",
        };
        write!(f, "{s}")
    }
}

impl Error {
    pub fn new(message: String) -> Self {
        Error::Other(message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ErrMalformedOffer(_) | Error::ErrEmptyOffer | Error::ErrOfferTooLarge { .. } => {
                ErrorKind::MalformedOffer
            }
            Error::ErrCodecUnsupported { .. } => ErrorKind::CodecUnsupported,
            Error::ErrNoLocalDescription
            | Error::ErrGatheringTimeout(_)
            | Error::ErrGatheringAborted
            | Error::WebRTC(_) => ErrorKind::NegotiationFailed,
            Error::ErrInvalidStateTransition { .. } => ErrorKind::InvalidState,
            Error::ErrConnectivityFailed | Error::ErrSourceClosed => ErrorKind::ConnectivityFailed,
            Error::ErrRelayUnavailable => ErrorKind::RelayUnavailable,
            Error::ErrPublisherActive => ErrorKind::PublisherActive,
            Error::ErrSinkClosed => ErrorKind::SinkClosed,
            Error::ErrEmptySample
            | Error::ErrInvalidConfig(_)
            | Error::Io(_)
            | Error::Hyper(_)
            | Error::Json(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// status_code is the HTTP status returned when this error ends a
    /// WHIP/WHEP request.
    pub fn status_code(&self) -> StatusCode {
        match (self, self.kind()) {
            (Error::ErrOfferTooLarge { .. }, _) => StatusCode::PAYLOAD_TOO_LARGE,
            (Error::ErrGatheringTimeout(_), _) => StatusCode::GATEWAY_TIMEOUT,
            (_, ErrorKind::MalformedOffer) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::CodecUnsupported) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::PublisherActive) | (_, ErrorKind::InvalidState) => StatusCode::CONFLICT,
            (_, ErrorKind::RelayUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// flatten_errs joins several errors into one, or returns Ok when there are none.
pub fn flatten_errs(errs: Vec<Error>) -> Result<()> {
    if errs.is_empty() {
        Ok(())
    } else {
        let errs_strs: Vec<String> = errs.into_iter().map(|e| e.to_string()).collect();
        Err(Error::Other(errs_strs.join("\n")))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_kind_status() {
        let tests = vec![
            (Error::ErrEmptyOffer, ErrorKind::MalformedOffer, 400),
            (
                Error::ErrOfferTooLarge { size: 10, limit: 1 },
                ErrorKind::MalformedOffer,
                413,
            ),
            (
                Error::ErrCodecUnsupported {
                    expected: "video/H264".to_owned(),
                    got: "video/VP8".to_owned(),
                },
                ErrorKind::CodecUnsupported,
                422,
            ),
            (Error::ErrGatheringAborted, ErrorKind::NegotiationFailed, 500),
            (
                Error::ErrGatheringTimeout(std::time::Duration::from_secs(1)),
                ErrorKind::NegotiationFailed,
                504,
            ),
            (Error::ErrPublisherActive, ErrorKind::PublisherActive, 409),
            (Error::ErrRelayUnavailable, ErrorKind::RelayUnavailable, 503),
            (Error::ErrSinkClosed, ErrorKind::SinkClosed, 500),
            (Error::ErrConnectivityFailed, ErrorKind::ConnectivityFailed, 500),
        ];

        for (err, kind, status) in tests {
            assert_eq!(err.kind(), kind, "{err}");
            assert_eq!(err.status_code().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn test_flatten_errs() {
        assert!(flatten_errs(vec![]).is_ok());
        let err = flatten_errs(vec![Error::ErrSinkClosed, Error::ErrRelayUnavailable])
            .unwrap_err();
        assert_eq!(err.to_string(), "sink closed\nrelay track has no producer");
    }
}
