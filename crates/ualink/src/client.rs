//! The client facade: one endpoint, one session, cached attribute access.

use std::sync::Arc;

use tracing::{debug, trace};
use ualink_cache::AttributeCache;
use ualink_protocol::{
    AttributeId, Codec, DataValue, EndpointDescription, JsonCodec, NodeId, ReadRequest,
    ReadValueId, RequestHeader, ServiceRequest, ServiceResponse, WriteRequest, WriteValue,
};
use ualink_session::{
    ChannelClient, IdentityProvider, ListenerId, Session, SessionActivityListener, SessionFsm,
    SessionStateKind, SubscriptionManager,
};
use ualink_subscription::SubscriptionRegistry;
use ualink_timer::{Clock, Scheduler, SystemClock};
use ualink_transport::{Connector, WebSocketConnector};

use crate::stack::{StackClient, unsecured_endpoint};
use crate::{ClientConfig, UaClientError};

// ---------------------------------------------------------------------------
// UaClient
// ---------------------------------------------------------------------------

/// A client for one OPC UA server endpoint.
///
/// Owns the channel, the session state machine running on it, the
/// subscription registry the state machine reports to, and a cache of
/// non-`Value` attributes. Every operation that needs a session waits for
/// one through [`get_session`](Self::get_session), so a client recovers on
/// its own after the connection drops.
///
/// ```no_run
/// use ualink::prelude::*;
///
/// # async fn run() -> Result<(), UaClientError> {
/// let client = UaClient::websocket("ws://localhost:4840").build();
/// client.connect().await?;
///
/// let node = NodeId::string(2, "Pump1");
/// let name = client.read_attribute(&node, AttributeId::DisplayName).await?;
/// println!("{}", name.value);
///
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct UaClient<K: Connector, D: Codec = JsonCodec> {
    stack: Arc<StackClient<K, D>>,
    fsm: SessionFsm,
    cache: Arc<AttributeCache<DataValue>>,
    subscriptions: Arc<SubscriptionRegistry>,
    config: ClientConfig,
}

impl UaClient<WebSocketConnector> {
    /// Starts building a client that dials `url` over WebSocket.
    pub fn websocket(url: impl Into<String>) -> UaClientBuilder<WebSocketConnector> {
        UaClientBuilder::new(WebSocketConnector::new(url))
    }
}

impl<K: Connector> UaClient<K> {
    /// Starts building a client on top of `connector`.
    pub fn builder(connector: K) -> UaClientBuilder<K> {
        UaClientBuilder::new(connector)
    }
}

impl<K: Connector, D: Codec> UaClient<K, D> {
    /// Returns the active session, creating and activating one first if
    /// needed.
    pub async fn get_session(&self) -> Result<Arc<Session>, UaClientError> {
        Ok(self.fsm.get_session().await?)
    }

    /// Connects and activates a session. Same as
    /// [`get_session`](Self::get_session).
    pub async fn connect(&self) -> Result<Arc<Session>, UaClientError> {
        self.get_session().await
    }

    /// Closes the session and the connection. Returns once both are gone.
    pub async fn disconnect(&self) -> Result<(), UaClientError> {
        Ok(self.fsm.disconnect().await?)
    }

    /// Reads one attribute of one node.
    ///
    /// Attributes other than `Value` are served from the cache when
    /// present. A good result read from the server is cached.
    pub async fn read_attribute(
        &self,
        node: &NodeId,
        attribute: AttributeId,
    ) -> Result<DataValue, UaClientError> {
        if let Some(cached) = self.cache.get(node, attribute) {
            trace!(%node, %attribute, "attribute served from cache");
            return Ok(cached);
        }

        let session = self.get_session().await?;
        let request = ServiceRequest::Read(ReadRequest {
            request_header: self.request_header(&session),
            max_age: 0.0,
            nodes_to_read: vec![ReadValueId {
                node_id: node.clone(),
                attribute_id: attribute,
            }],
        });

        let response = self.stack.send_request(request).await?;
        let ServiceResponse::Read(read) = response else {
            return Err(UaClientError::UnexpectedResponse {
                expected: "Read",
                actual: response.name(),
            });
        };
        let value = read
            .results
            .into_iter()
            .next()
            .ok_or(UaClientError::EmptyResult("Read"))?;

        if value.status.is_good() {
            self.cache.put(node, attribute, value.clone());
        }
        Ok(value)
    }

    /// Writes one attribute of one node.
    ///
    /// A good write drops the cached copy of that attribute.
    ///
    /// # Errors
    /// [`UaClientError::Status`] if the server rejected the write.
    pub async fn write_attribute(
        &self,
        node: &NodeId,
        attribute: AttributeId,
        value: DataValue,
    ) -> Result<(), UaClientError> {
        let session = self.get_session().await?;
        let request = ServiceRequest::Write(WriteRequest {
            request_header: self.request_header(&session),
            nodes_to_write: vec![WriteValue {
                node_id: node.clone(),
                attribute_id: attribute,
                value,
            }],
        });

        let response = self.stack.send_request(request).await?;
        let ServiceResponse::Write(write) = response else {
            return Err(UaClientError::UnexpectedResponse {
                expected: "Write",
                actual: response.name(),
            });
        };
        let status = write
            .results
            .first()
            .copied()
            .ok_or(UaClientError::EmptyResult("Write"))?;

        if !status.is_good() {
            debug!(%node, %attribute, %status, "write rejected");
            return Err(UaClientError::Status(status));
        }
        self.cache.invalidate_attribute(node, attribute);
        Ok(())
    }

    /// Registers a listener for session active/inactive edges.
    pub fn add_session_listener(&self, listener: Arc<dyn SessionActivityListener>) -> ListenerId {
        self.fsm.add_listener(listener)
    }

    /// Unregisters a session listener. Returns `false` if it was not
    /// registered.
    pub fn remove_session_listener(&self, id: ListenerId) -> bool {
        self.fsm.remove_listener(id)
    }

    /// The session lifecycle state right now.
    pub fn state(&self) -> SessionStateKind {
        self.fsm.state()
    }

    /// The session state machine, for watching transitions or raising
    /// events directly.
    pub fn session_fsm(&self) -> &SessionFsm {
        &self.fsm
    }

    /// Subscriptions known to this client.
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// The attribute cache.
    pub fn cache(&self) -> &Arc<AttributeCache<DataValue>> {
        &self.cache
    }

    /// The channel requests go out on.
    pub fn channel(&self) -> &Arc<StackClient<K, D>> {
        &self.stack
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request_header(&self, session: &Session) -> RequestHeader {
        RequestHeader::new(
            session.authentication_token.clone(),
            self.config.session.timeout_hint(),
        )
    }
}

impl<K: Connector, D: Codec> std::fmt::Debug for UaClient<K, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UaClient")
            .field("url", &self.stack.endpoint_url())
            .field("state", &self.fsm.state())
            .field("cached", &self.cache.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures a [`UaClient`].
///
/// Everything but the connector has a default: JSON encoding, an unsecured
/// endpoint at the connector's URL, anonymous identity, Tokio timers and
/// the system clock.
pub struct UaClientBuilder<K, D = JsonCodec> {
    connector: K,
    codec: D,
    endpoint: Option<EndpointDescription>,
    config: ClientConfig,
    identity: Option<Arc<dyn IdentityProvider>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    clock: Arc<dyn Clock>,
}

impl<K: Connector> UaClientBuilder<K> {
    fn new(connector: K) -> Self {
        Self {
            connector,
            codec: JsonCodec,
            endpoint: None,
            config: ClientConfig::default(),
            identity: None,
            scheduler: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl<K: Connector, D: Codec> UaClientBuilder<K, D> {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// The endpoint sessions are created against. Default: no security,
    /// anonymous and user name tokens accepted.
    pub fn endpoint(mut self, endpoint: EndpointDescription) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Identity presented on activation. Default: anonymous.
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Scheduler for reactivation delays.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Clock the attribute cache expires entries by.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the wire encoding.
    pub fn codec<D2: Codec>(self, codec: D2) -> UaClientBuilder<K, D2> {
        UaClientBuilder {
            connector: self.connector,
            codec,
            endpoint: self.endpoint,
            config: self.config,
            identity: self.identity,
            scheduler: self.scheduler,
            clock: self.clock,
        }
    }

    /// Builds the client and spawns its session state machine. No
    /// connection is made until a session is first needed.
    ///
    /// # Panics
    /// If called outside a Tokio runtime.
    pub fn build(self) -> UaClient<K, D> {
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| unsecured_endpoint(self.connector.endpoint_url()));
        let stack = Arc::new(StackClient::new(
            self.connector,
            self.codec,
            endpoint,
            self.config.transport.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let cache = Arc::new(AttributeCache::new(self.config.cache.clone(), self.clock));

        let manager: Arc<dyn SubscriptionManager> = subscriptions.clone();
        let mut fsm = SessionFsm::builder(Arc::clone(&stack))
            .config(self.config.session.clone())
            .subscriptions(manager);
        if let Some(identity) = self.identity {
            fsm = fsm.identity(identity);
        }
        if let Some(scheduler) = self.scheduler {
            fsm = fsm.scheduler(scheduler);
        }
        debug!(url = stack.endpoint_url(), "client built");

        UaClient {
            stack,
            fsm: fsm.spawn(),
            cache,
            subscriptions,
            config: self.config,
        }
    }
}
