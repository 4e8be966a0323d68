//! Unified error type for the ualink client.

use ualink_protocol::{ProtocolError, StatusCode};
use ualink_session::SessionError;
use ualink_subscription::SubscriptionError;
use ualink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `ualink` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each wrapping variant generates the `From` impl, so `?`
/// converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum UaClientError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (create, activate, closed, fault).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A subscription bookkeeping error.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// The server answered with a different service than was asked for.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    /// The service succeeded but returned no result for the operation.
    #[error("{0} returned no results")]
    EmptyResult(&'static str),

    /// A single operation within a successful service call failed.
    #[error("operation failed: {0}")]
    Status(StatusCode),
}

impl UaClientError {
    /// The status code this error stands for, where there is one.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Session(e) => Some(e.status_code()),
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}
