//! End-to-end tests: a `UaClient` talking to a fake OPC UA server over a
//! real WebSocket on loopback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::tungstenite::Message;
use ualink::prelude::*;
use ualink::protocol::{
    ActivateSessionResponse, ByteString, CloseSessionResponse, CreateSessionResponse,
    ReadResponse, RequestEnvelope, ResponseEnvelope, ResponseHeader, ServiceFault,
    ServiceRequest, ServiceResponse, SignatureData, TransferResult,
    TransferSubscriptionsResponse, WriteResponse,
};
use ualink::session::{ChannelClient, SessionEvent};
use ualink::transport::WebSocketConnector;

// =========================================================================
// Fake server
// =========================================================================

#[derive(Default)]
struct ServerState {
    next_session: u32,
    /// Authentication tokens the server still knows.
    sessions: HashSet<NodeId>,
    values: HashMap<(NodeId, AttributeId), DataValue>,
    requests: Vec<&'static str>,
}

/// Speaks just enough of the session and attribute services to keep a
/// client happy. Sessions outlive connections, as on a real server.
struct FakeServer {
    url: String,
    state: Arc<Mutex<ServerState>>,
    /// Bumping the generation closes every open connection.
    kill: watch::Sender<u64>,
}

impl FakeServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
        let url = format!("ws://{}", listener.local_addr().expect("should have addr"));
        let state = Arc::new(Mutex::new(ServerState::default()));
        let (kill, _) = watch::channel(0u64);

        let accept_state = Arc::clone(&state);
        let accept_kill = kill.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                tokio::spawn(serve(ws, Arc::clone(&accept_state), accept_kill.subscribe()));
            }
        });

        Self { url, state, kill }
    }

    fn client(&self) -> UaClient<WebSocketConnector> {
        UaClient::websocket(self.url.clone()).build()
    }

    fn set_value(&self, node: &NodeId, attribute: AttributeId, value: Variant) {
        self.state
            .lock()
            .values
            .insert((node.clone(), attribute), DataValue::new(value));
    }

    fn requests(&self) -> Vec<&'static str> {
        self.state.lock().requests.clone()
    }

    fn count(&self, service: &str) -> usize {
        self.requests().iter().filter(|r| **r == service).count()
    }

    fn drop_connections(&self) {
        self.kill.send_modify(|generation| *generation += 1);
    }

    fn forget_sessions(&self) {
        self.state.lock().sessions.clear();
    }
}

async fn serve(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    state: Arc<Mutex<ServerState>>,
    mut kill: watch::Receiver<u64>,
) {
    loop {
        let msg = tokio::select! {
            msg = ws.next() => msg,
            _ = kill.changed() => return,
        };
        let Some(Ok(msg)) = msg else { return };
        if !msg.is_binary() {
            continue;
        }

        let envelope: RequestEnvelope = serde_json::from_slice(&msg.into_data()).expect("decode");
        let body = respond(&mut state.lock(), envelope.body);
        let reply = ResponseEnvelope {
            request_handle: envelope.request_handle,
            body,
        };
        let bytes = serde_json::to_vec(&reply).expect("encode");
        if ws.send(Message::Binary(bytes.into())).await.is_err() {
            return;
        }
    }
}

fn fault(handle: u32, status: StatusCode) -> ServiceResponse {
    ServiceResponse::ServiceFault(ServiceFault {
        response_header: ResponseHeader {
            request_handle: handle,
            service_result: status,
            ..Default::default()
        },
    })
}

fn respond(state: &mut ServerState, request: ServiceRequest) -> ServiceResponse {
    state.requests.push(request.name());
    let header = request.header().clone();
    let handle = header.request_handle;
    let known = state.sessions.contains(&header.authentication_token);

    match request {
        ServiceRequest::CreateSession(req) => {
            state.next_session += 1;
            let n = state.next_session;
            let token = NodeId::opaque(0, vec![n as u8; 4]);
            state.sessions.insert(token.clone());
            ServiceResponse::CreateSession(CreateSessionResponse {
                response_header: ResponseHeader::good(handle),
                session_id: NodeId::numeric(1, n),
                authentication_token: token,
                revised_session_timeout: req.requested_session_timeout,
                server_nonce: ByteString::of([n as u8; 32]),
                server_certificate: ByteString::NULL,
                server_endpoints: Vec::new(),
                server_software_certificates: Vec::new(),
                server_signature: SignatureData::default(),
                max_request_message_size: 0,
            })
        }
        _ if !known => fault(handle, StatusCode::BAD_SESSION_ID_INVALID),
        ServiceRequest::ActivateSession(_) => {
            ServiceResponse::ActivateSession(ActivateSessionResponse {
                response_header: ResponseHeader::good(handle),
                server_nonce: ByteString::of([0xA5; 32]),
                results: Vec::new(),
            })
        }
        ServiceRequest::CloseSession(_) => {
            state.sessions.remove(&header.authentication_token);
            ServiceResponse::CloseSession(CloseSessionResponse {
                response_header: ResponseHeader::good(handle),
            })
        }
        ServiceRequest::TransferSubscriptions(req) => {
            ServiceResponse::TransferSubscriptions(TransferSubscriptionsResponse {
                response_header: ResponseHeader::good(handle),
                results: req
                    .subscription_ids
                    .iter()
                    .map(|_| TransferResult {
                        status_code: StatusCode::GOOD,
                        available_sequence_numbers: Vec::new(),
                    })
                    .collect(),
            })
        }
        ServiceRequest::Read(req) => {
            let results = req
                .nodes_to_read
                .iter()
                .map(|r| {
                    state
                        .values
                        .get(&(r.node_id.clone(), r.attribute_id))
                        .cloned()
                        .unwrap_or_else(|| DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN))
                })
                .collect();
            ServiceResponse::Read(ReadResponse {
                response_header: ResponseHeader::good(handle),
                results,
            })
        }
        ServiceRequest::Write(req) => {
            let results = req
                .nodes_to_write
                .into_iter()
                .map(|w| {
                    if w.node_id == NodeId::string(2, "ReadOnly") {
                        return StatusCode::BAD_NOT_WRITABLE;
                    }
                    state.values.insert((w.node_id, w.attribute_id), w.value);
                    StatusCode::GOOD
                })
                .collect();
            ServiceResponse::Write(WriteResponse {
                response_header: ResponseHeader::good(handle),
                results,
            })
        }
    }
}

// =========================================================================
// Helpers
// =========================================================================

async fn wait_for_transition(
    rx: &mut broadcast::Receiver<Transition>,
    to: SessionStateKind,
) -> Vec<Transition> {
    let mut seen = Vec::new();
    loop {
        let t = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transition")
            .expect("transition channel closed");
        seen.push(t);
        if t.to == to {
            return seen;
        }
    }
}

#[derive(Default)]
struct CountingListener {
    active: Mutex<Vec<NodeId>>,
    inactive: Mutex<Vec<NodeId>>,
}

impl SessionActivityListener for CountingListener {
    fn on_session_active(&self, session: &Session) {
        self.active.lock().push(session.session_id.clone());
    }

    fn on_session_inactive(&self, session: &Session) {
        self.inactive.lock().push(session.session_id.clone());
    }
}

fn display_name(text: &str) -> Variant {
    Variant::LocalizedText {
        locale: None,
        text: text.into(),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_connect_creates_and_activates_session() {
    let server = FakeServer::start().await;
    let client = server.client();
    assert_eq!(client.state(), SessionStateKind::Inactive);

    let session = client.connect().await.expect("should connect");

    assert_eq!(session.session_id, NodeId::numeric(1, 1));
    assert_eq!(session.server_nonce, ByteString::of([0xA5; 32]));
    assert_eq!(client.state(), SessionStateKind::Active);
    assert_eq!(server.requests(), ["CreateSession", "ActivateSession"]);
}

#[tokio::test]
async fn test_get_session_when_active_sends_nothing() {
    let server = FakeServer::start().await;
    let client = server.client();

    let first = client.get_session().await.unwrap();
    let second = client.get_session().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(server.count("CreateSession"), 1);
    assert_eq!(server.count("ActivateSession"), 1);
}

#[tokio::test]
async fn test_read_non_value_attribute_is_cached() {
    let server = FakeServer::start().await;
    let node = NodeId::string(2, "Pump1");
    server.set_value(&node, AttributeId::DisplayName, display_name("Pump 1"));
    let client = server.client();

    let first = client.read_attribute(&node, AttributeId::DisplayName).await.unwrap();
    let second = client.read_attribute(&node, AttributeId::DisplayName).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.value, display_name("Pump 1"));
    assert_eq!(server.count("Read"), 1);
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn test_read_value_attribute_always_goes_to_server() {
    let server = FakeServer::start().await;
    let node = NodeId::string(2, "Pump1");
    server.set_value(&node, AttributeId::Value, Variant::Double(1.5));
    let client = server.client();

    client.read_attribute(&node, AttributeId::Value).await.unwrap();
    server.set_value(&node, AttributeId::Value, Variant::Double(2.5));
    let latest = client.read_attribute(&node, AttributeId::Value).await.unwrap();

    assert_eq!(latest.value, Variant::Double(2.5));
    assert_eq!(server.count("Read"), 2);
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_read_bad_status_is_not_cached() {
    let server = FakeServer::start().await;
    let client = server.client();
    let node = NodeId::string(2, "Missing");

    let result = client.read_attribute(&node, AttributeId::DisplayName).await.unwrap();
    assert_eq!(result.status, StatusCode::BAD_NODE_ID_UNKNOWN);

    client.read_attribute(&node, AttributeId::DisplayName).await.unwrap();
    assert_eq!(server.count("Read"), 2);
}

#[tokio::test]
async fn test_write_invalidates_cached_attribute() {
    let server = FakeServer::start().await;
    let node = NodeId::string(2, "Pump1");
    server.set_value(&node, AttributeId::Description, display_name("old"));
    let client = server.client();

    client.read_attribute(&node, AttributeId::Description).await.unwrap();
    client
        .write_attribute(&node, AttributeId::Description, DataValue::new(display_name("new")))
        .await
        .expect("write should succeed");
    let after = client.read_attribute(&node, AttributeId::Description).await.unwrap();

    assert_eq!(after.value, display_name("new"));
    assert_eq!(server.count("Read"), 2);
}

#[tokio::test]
async fn test_rejected_write_returns_status_and_keeps_cache() {
    let server = FakeServer::start().await;
    let node = NodeId::string(2, "ReadOnly");
    server.set_value(&node, AttributeId::DisplayName, display_name("fixed"));
    let client = server.client();

    client.read_attribute(&node, AttributeId::DisplayName).await.unwrap();
    let err = client
        .write_attribute(&node, AttributeId::DisplayName, DataValue::new(display_name("x")))
        .await
        .unwrap_err();

    assert!(matches!(err, UaClientError::Status(StatusCode::BAD_NOT_WRITABLE)));
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn test_connection_drop_reactivates_same_session() {
    let server = FakeServer::start().await;
    let client = server.client();
    let listener = Arc::new(CountingListener::default());
    client.add_session_listener(listener.clone());

    let before = client.connect().await.unwrap();
    let mut transitions = client.session_fsm().subscribe_transitions();
    server.drop_connections();

    let seen = wait_for_transition(&mut transitions, SessionStateKind::Active).await;
    let path: Vec<_> = seen.iter().map(|t| t.to).collect();
    assert_eq!(
        path,
        [
            SessionStateKind::ReactivateDelay,
            SessionStateKind::ReactivateExecute,
            SessionStateKind::Active,
        ]
    );

    let after = client.get_session().await.unwrap();
    assert_eq!(after.session_id, before.session_id);
    assert_eq!(after.authentication_token, before.authentication_token);
    assert_eq!(server.count("CreateSession"), 1);
    assert_eq!(server.count("ActivateSession"), 2);
    assert_eq!(listener.active.lock().len(), 2);
    assert_eq!(listener.inactive.lock().len(), 1);
}

#[tokio::test]
async fn test_forgotten_session_is_recreated_after_reconnect() {
    let server = FakeServer::start().await;
    let client = server.client();
    client.connect().await.unwrap();

    let mut transitions = client.session_fsm().subscribe_transitions();
    server.forget_sessions();
    server.drop_connections();

    let seen = wait_for_transition(&mut transitions, SessionStateKind::Active).await;
    assert!(
        seen.iter()
            .any(|t| t.event == SessionEvent::ErrReactivateInvalid
                && t.to == SessionStateKind::CreatingSession)
    );

    let session = client.get_session().await.unwrap();
    assert_eq!(session.session_id, NodeId::numeric(1, 2));
    assert_eq!(server.count("CreateSession"), 2);
}

#[tokio::test]
async fn test_stale_session_fault_during_read_recreates_session() {
    let server = FakeServer::start().await;
    let node = NodeId::string(2, "Pump1");
    server.set_value(&node, AttributeId::Value, Variant::Int32(7));
    let client = server.client();
    client.connect().await.unwrap();

    let mut transitions = client.session_fsm().subscribe_transitions();
    server.forget_sessions();
    let err = client.read_attribute(&node, AttributeId::Value).await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::BAD_SESSION_ID_INVALID));

    wait_for_transition(&mut transitions, SessionStateKind::Active).await;
    let value = client.read_attribute(&node, AttributeId::Value).await.unwrap();
    assert_eq!(value.value, Variant::Int32(7));
    assert_eq!(client.get_session().await.unwrap().session_id, NodeId::numeric(1, 2));
}

#[tokio::test]
async fn test_disconnect_closes_session_and_channel() {
    let server = FakeServer::start().await;
    let client = server.client();
    client.connect().await.unwrap();

    client.disconnect().await.expect("disconnect should succeed");

    assert_eq!(client.state(), SessionStateKind::Inactive);
    assert!(!client.channel().is_connected());
    assert_eq!(server.count("CloseSession"), 1);
    assert!(server.state.lock().sessions.is_empty());
}

#[tokio::test]
async fn test_connect_to_closed_port_fails_with_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = UaClient::websocket(url).build();
    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, UaClientError::Session(SessionError::Transport(_))));
    let mut state = client.session_fsm().watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SessionStateKind::Inactive),
    )
    .await
    .expect("should fall back to inactive")
    .unwrap();
    assert!(!client.channel().is_connected());
}
