//! The request/response channel the session state machine runs on.
//!
//! [`StackClient`] turns a byte [`Connection`] into a typed
//! [`ChannelClient`]: every request is wrapped in an envelope carrying a
//! fresh request handle, and a background reader task pairs each response
//! envelope with the caller waiting on that handle.
//!
//! ```text
//! send_request ──encode──▶ Connection::send
//!      ▲                        │
//!      └── pending[handle] ◀── reader task ◀── Connection::recv
//!                                   │
//!                                   └──▶ ChannelEvent (fault / inactive)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};
use ualink_protocol::{
    ByteString, Codec, EndpointDescription, JsonCodec, MessageSecurityMode, RequestEnvelope,
    ResponseEnvelope, SecurityPolicy, ServiceRequest, ServiceResponse, UserTokenPolicy,
    UserTokenType,
};
use ualink_session::{ChannelClient, ChannelEvent, SessionError};
use ualink_transport::{Connection, Connector, TransportError};

use crate::TransportConfig;

/// Capacity of the channel event broadcast.
const EVENT_CAPACITY: usize = 32;

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<ServiceResponse>>>>;

/// One open connection, the requests waiting on it, and the task reading
/// from it.
struct Link<T> {
    conn: Arc<T>,
    /// Cleared by the reader when the connection ends.
    alive: Arc<AtomicBool>,
    pending: Pending,
    reader: AbortHandle,
}

impl<T> Link<T> {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// StackClient
// ---------------------------------------------------------------------------

/// A [`ChannelClient`] over any [`Connector`], encoding with any [`Codec`].
///
/// Connecting is explicit: `send_request` on a closed channel fails instead
/// of dialing. When the connection drops, every request still waiting is
/// failed and [`ChannelEvent::Inactive`] is broadcast.
pub struct StackClient<K: Connector, D: Codec = JsonCodec> {
    connector: K,
    codec: Arc<D>,
    endpoint: EndpointDescription,
    config: TransportConfig,
    next_handle: AtomicU32,
    link: Mutex<Option<Arc<Link<K::Connection>>>>,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ChannelEvent>,
}

impl<K: Connector, D: Codec> StackClient<K, D> {
    /// Creates a disconnected channel.
    pub fn new(
        connector: K,
        codec: D,
        endpoint: EndpointDescription,
        config: TransportConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector,
            codec: Arc::new(codec),
            endpoint,
            config,
            next_handle: AtomicU32::new(1),
            link: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// The URL the connector dials.
    pub fn endpoint_url(&self) -> &str {
        self.connector.endpoint_url()
    }

    /// Requests sent and not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.current_link()
            .map_or(0, |link| link.pending.lock().len())
    }

    fn current_link(&self) -> Option<Arc<Link<K::Connection>>> {
        self.link.lock().clone().filter(|link| link.is_alive())
    }

    /// Handles start at 1 and skip 0 on wrap-around.
    fn allocate_handle(&self) -> u32 {
        loop {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }

    async fn open(&self) -> Result<(), TransportError> {
        let timeout = self.config.connect_timeout();
        let conn = tokio::time::timeout(timeout, self.connector.connect())
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        let conn = Arc::new(conn);
        let conn_id = conn.id();
        let alive = Arc::new(AtomicBool::new(true));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn(read_loop(
            Arc::clone(&conn),
            Arc::clone(&self.codec),
            Arc::clone(&pending),
            self.events.clone(),
            Arc::clone(&alive),
        ));

        let previous = self.link.lock().replace(Arc::new(Link {
            conn,
            alive,
            pending,
            reader: reader.abort_handle(),
        }));
        if let Some(stale) = previous {
            stale.reader.abort();
        }
        info!(%conn_id, url = self.connector.endpoint_url(), "channel connected");
        Ok(())
    }
}

impl<K: Connector, D: Codec> ChannelClient for StackClient<K, D> {
    async fn connect(&self) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;
        if self.current_link().is_some() {
            return Ok(());
        }
        self.open().await.map_err(|e| {
            debug!(url = self.connector.endpoint_url(), error = %e, "connect failed");
            SessionError::Transport(e.to_string())
        })
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let _guard = self.lifecycle.lock().await;
        let Some(link) = self.link.lock().take() else {
            return Ok(());
        };
        link.alive.store(false, Ordering::Release);
        link.reader.abort();
        // Dropping the senders fails every request still in flight.
        link.pending.lock().clear();

        let conn_id = link.conn.id();
        match link.conn.close().await {
            Ok(()) => {
                info!(%conn_id, "channel disconnected");
                Ok(())
            }
            Err(e) => {
                debug!(%conn_id, error = %e, "close failed");
                Err(SessionError::Transport(e.to_string()))
            }
        }
    }

    async fn send_request(&self, mut request: ServiceRequest) -> Result<ServiceResponse, SessionError> {
        let link = self
            .current_link()
            .ok_or_else(|| SessionError::Transport("not connected".into()))?;

        let handle = self.allocate_handle();
        request.header_mut().request_handle = handle;
        let service = request.name();
        let envelope = RequestEnvelope {
            request_handle: handle,
            body: request,
        };
        let data = self
            .codec
            .encode(&envelope)
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        link.pending.lock().insert(handle, reply_tx);

        if let Err(e) = link.conn.send(&data).await {
            link.pending.lock().remove(&handle);
            return Err(SessionError::Transport(e.to_string()));
        }
        trace!(handle, service, "request sent");

        let response = match tokio::time::timeout(self.config.request_timeout(), reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(SessionError::Transport(
                    TransportError::ConnectionClosed(format!("{service} request abandoned"))
                        .to_string(),
                ));
            }
            Err(_) => {
                link.pending.lock().remove(&handle);
                debug!(handle, service, "request timed out");
                return Err(SessionError::Timeout);
            }
        };

        match response.fault() {
            Some(status) => Err(SessionError::ServiceFault(status)),
            None => Ok(response),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.current_link().is_some()
    }

    fn endpoint(&self) -> Option<EndpointDescription> {
        Some(self.endpoint.clone())
    }

    fn security_policy(&self) -> SecurityPolicy {
        self.endpoint.security_policy().unwrap_or_default()
    }

    fn sign(&self, _data: &[u8]) -> Result<ByteString, SessionError> {
        Err(SessionError::Signature(
            "no client private key configured".into(),
        ))
    }
}

impl<K: Connector, D: Codec> std::fmt::Debug for StackClient<K, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackClient")
            .field("url", &self.connector.endpoint_url())
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// Reads response envelopes until the connection ends, then marks the link
/// dead and fails whatever is still pending.
async fn read_loop<T: Connection, D: Codec>(
    conn: Arc<T>,
    codec: Arc<D>,
    pending: Pending,
    events: broadcast::Sender<ChannelEvent>,
    alive: Arc<AtomicBool>,
) {
    let conn_id = conn.id();
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(%conn_id, "connection closed by peer");
                break;
            }
            Err(e) => {
                debug!(%conn_id, error = %e, "receive failed");
                break;
            }
        };

        let envelope: ResponseEnvelope = match codec.decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%conn_id, error = %e, "dropping undecodable response");
                continue;
            }
        };

        if let Some(status) = envelope.body.fault() {
            let _ = events.send(ChannelEvent::ServiceFault(status));
        }

        let handle = envelope.request_handle;
        match pending.lock().remove(&handle) {
            Some(reply) => {
                let _ = reply.send(envelope.body);
            }
            None => debug!(%conn_id, handle, "response for unknown request"),
        }
    }

    alive.store(false, Ordering::Release);
    pending.lock().clear();
    let _ = events.send(ChannelEvent::Inactive);
}

/// An endpoint with no message security that accepts anonymous and
/// user name tokens. Used when the caller does not supply one.
pub fn unsecured_endpoint(url: impl Into<String>) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: url.into(),
        security_mode: MessageSecurityMode::None,
        security_policy_uri: SecurityPolicy::None.uri().to_string(),
        user_identity_tokens: vec![
            UserTokenPolicy {
                policy_id: Some("anonymous".into()),
                token_type: UserTokenType::Anonymous,
                security_policy_uri: None,
            },
            UserTokenPolicy {
                policy_id: Some("username".into()),
                token_type: UserTokenType::UserName,
                security_policy_uri: None,
            },
        ],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsecured_endpoint_offers_anonymous_and_username() {
        let endpoint = unsecured_endpoint("ws://localhost:4840");
        assert_eq!(endpoint.security_policy(), Some(SecurityPolicy::None));
        assert!(endpoint.token_policy(UserTokenType::Anonymous).is_some());
        assert!(endpoint.token_policy(UserTokenType::UserName).is_some());
        assert!(endpoint.token_policy(UserTokenType::Certificate).is_none());
    }
}
