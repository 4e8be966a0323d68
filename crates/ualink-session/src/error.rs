//! Error types for the session layer.

use ualink_protocol::StatusCode;

/// Errors surfaced by the session state machine and its collaborators.
///
/// `Clone` because a single failure is delivered to every caller waiting
/// on the same session future.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The session was closed, or the attempt that would have produced it
    /// was abandoned (e.g. a disconnect arrived while it was being created).
    #[error("session closed")]
    SessionClosed,

    /// The server answered with a bad service result.
    #[error("service fault: {0}")]
    ServiceFault(StatusCode),

    /// The channel could not deliver a request or lost its connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request received no response within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The identity provider could not produce a token for the endpoint.
    #[error("identity token unavailable: {0}")]
    Identity(String),

    /// Building the client signature failed.
    #[error("signing failed: {0}")]
    Signature(String),

    /// The channel has no endpoint description to create a session against.
    #[error("cannot create session with no endpoint configured")]
    NoEndpoint,

    /// The server answered with a different service than was asked for.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    /// The state machine task is gone.
    #[error("session state machine stopped")]
    Shutdown,
}

impl SessionError {
    /// The status code this error stands for.
    ///
    /// Used to decide whether a failed reactivation may be retried or the
    /// session has to be created again; see
    /// [`StatusCode::is_session_invalid`].
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionClosed => StatusCode::BAD_SESSION_CLOSED,
            Self::ServiceFault(code) => *code,
            Self::Transport(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            Self::Timeout => StatusCode::BAD_TIMEOUT,
            Self::Identity(_) => StatusCode::BAD_IDENTITY_TOKEN_INVALID,
            Self::Signature(_) | Self::UnexpectedResponse { .. } => StatusCode::BAD_UNEXPECTED_ERROR,
            Self::NoEndpoint => StatusCode::BAD,
            Self::Shutdown => StatusCode::BAD_SHUTDOWN,
        }
    }
}
