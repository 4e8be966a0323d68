//! Transport abstraction layer for ualink.
//!
//! Provides the [`Connector`] and [`Connection`] traits that hide how the
//! client reaches a server. The session layer only ever sees bytes going
//! in and out of a [`Connection`]; reconnecting is a matter of calling
//! [`Connector::connect`] again.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket connector via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opens outgoing connections to one server.
///
/// The returned futures are `Send` so a connector can be driven from
/// inside spawned tasks.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Opens a new connection.
    fn connect(
        &self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// The address this connector dials, for logging.
    fn endpoint_url(&self) -> &str;
}

/// A single connection that can send and receive bytes.
///
/// `send` and `recv` may be called concurrently from different tasks:
/// a reader task usually sits in `recv` while requests are being sent.
pub trait Connection: Send + Sync + 'static {
    /// Sends one message to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
