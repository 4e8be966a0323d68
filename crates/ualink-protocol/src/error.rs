//! Error types for the protocol layer.
//!
//! Each crate in ualink defines its own error enum. A `ProtocolError`
//! always means the problem is in turning service messages into bytes or
//! back, never in networking or session state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a service message into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a service message).
    ///
    /// Common causes: malformed JSON, missing required fields, or a
    /// frame that belongs to a different encoding.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but is invalid at the protocol level, e.g. a
    /// node id string that does not follow the `ns=<n>;<t>=<id>` syntax.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
