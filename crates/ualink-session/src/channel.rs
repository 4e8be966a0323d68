//! What the state machine needs from the layer below it.

use std::future::Future;

use tokio::sync::broadcast;
use ualink_protocol::{
    ByteString, EndpointDescription, SecurityPolicy, ServiceRequest, ServiceResponse, StatusCode,
};

use crate::SessionError;

/// Out-of-band notifications from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The connection went away.
    Inactive,
    /// A response carried a bad service result.
    ServiceFault(StatusCode),
}

/// A request/response channel to one server endpoint.
///
/// The futures are `Send` because the state machine drives them from its
/// own spawned task.
pub trait ChannelClient: Send + Sync + 'static {
    /// Opens the connection. Succeeds immediately if already connected.
    fn connect(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Closes the connection. Succeeds if already closed.
    fn disconnect(&self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Sends a request and waits for its response.
    ///
    /// The channel assigns the request handle. A response whose service
    /// result is bad (including a `ServiceFault`) comes back as
    /// [`SessionError::ServiceFault`] and is also broadcast as a
    /// [`ChannelEvent::ServiceFault`]. Never connects implicitly.
    fn send_request(
        &self,
        request: ServiceRequest,
    ) -> impl Future<Output = Result<ServiceResponse, SessionError>> + Send;

    /// Subscribes to channel notifications.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Returns `true` while a connection is open.
    fn is_connected(&self) -> bool;

    /// The endpoint sessions are created against.
    fn endpoint(&self) -> Option<EndpointDescription>;

    /// Security policy in force on the channel.
    fn security_policy(&self) -> SecurityPolicy;

    /// Signs `data` with the client's private key under the channel's
    /// security policy. Only called when that policy is not `None`.
    fn sign(&self, data: &[u8]) -> Result<ByteString, SessionError>;
}
