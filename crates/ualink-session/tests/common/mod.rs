//! A scripted in-memory channel and recording hooks for state machine
//! tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use ualink_protocol::{
    ActivateSessionResponse, ByteString, CloseSessionResponse, CreateSessionResponse,
    EndpointDescription, NodeId, ResponseHeader, SecurityPolicy, ServiceRequest, ServiceResponse,
    SignatureData, StatusCode, TransferResult, TransferSubscriptionsResponse, UserTokenPolicy,
    UserTokenType,
};
use ualink_session::{
    ChannelClient, ChannelEvent, Session, SessionActivityListener, SessionError, SessionFsm,
    SessionEvent, SessionStateKind, SubscriptionManager, Transition,
};

// ---------------------------------------------------------------------------
// MockChannel
// ---------------------------------------------------------------------------

/// Answers every request with a plausible good response unless a failure
/// or latency has been scripted for that service.
pub struct MockChannel {
    connected: AtomicBool,
    events: broadcast::Sender<ChannelEvent>,
    next_session: AtomicU32,
    next_nonce: AtomicU32,
    requests: Mutex<Vec<ServiceRequest>>,
    failures: Mutex<HashMap<&'static str, VecDeque<SessionError>>>,
    connect_failures: Mutex<VecDeque<SessionError>>,
    latency: Mutex<HashMap<&'static str, Duration>>,
    disconnects: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            connected: AtomicBool::new(false),
            events,
            next_session: AtomicU32::new(1),
            next_nonce: AtomicU32::new(1),
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            connect_failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(HashMap::new()),
            disconnects: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        })
    }

    /// The next `service` request fails with `error`.
    pub fn fail_next(&self, service: &'static str, error: SessionError) {
        self.failures
            .lock()
            .entry(service)
            .or_default()
            .push_back(error);
    }

    /// The next `connect` fails with `error`.
    pub fn fail_next_connect(&self, error: SessionError) {
        self.connect_failures.lock().push_back(error);
    }

    /// Every `service` request takes `delay` to answer.
    pub fn set_latency(&self, service: &'static str, delay: Duration) {
        self.latency.lock().insert(service, delay);
    }

    /// Simulates the transport going away.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ChannelEvent::Inactive);
    }

    /// Broadcasts a service fault as if a response had carried it.
    pub fn fault(&self, status: StatusCode) {
        let _ = self.events.send(ChannelEvent::ServiceFault(status));
    }

    /// Names of the requests sent so far, in order.
    pub fn request_names(&self) -> Vec<&'static str> {
        self.requests.lock().iter().map(|r| r.name()).collect()
    }

    pub fn requests(&self) -> Vec<ServiceRequest> {
        self.requests.lock().clone()
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// The most requests ever awaiting an answer at the same time.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn answer(&self, request: ServiceRequest) -> Result<ServiceResponse, SessionError> {
        let name = request.name();
        let delay = self.latency.lock().get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .get_mut(name)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = failure {
            if let SessionError::ServiceFault(status) = &error {
                let _ = self.events.send(ChannelEvent::ServiceFault(*status));
            }
            return Err(error);
        }
        Ok(self.respond(&request))
    }

    fn respond(&self, request: &ServiceRequest) -> ServiceResponse {
        let header = ResponseHeader::good(request.header().request_handle);
        match request {
            ServiceRequest::CreateSession(_) => {
                let n = self.next_session.fetch_add(1, Ordering::SeqCst);
                ServiceResponse::CreateSession(CreateSessionResponse {
                    response_header: header,
                    session_id: NodeId::numeric(1, n),
                    authentication_token: NodeId::opaque(0, vec![n as u8; 4]),
                    revised_session_timeout: 60_000.0,
                    server_nonce: ByteString::of([n as u8; 32]),
                    server_certificate: ByteString::NULL,
                    server_endpoints: Vec::new(),
                    server_software_certificates: Vec::new(),
                    server_signature: SignatureData::default(),
                    max_request_message_size: 0,
                })
            }
            ServiceRequest::ActivateSession(_) => {
                let n = self.next_nonce.fetch_add(1, Ordering::SeqCst);
                ServiceResponse::ActivateSession(ActivateSessionResponse {
                    response_header: header,
                    server_nonce: ByteString::of([0xA0 | n as u8; 32]),
                    results: Vec::new(),
                })
            }
            ServiceRequest::CloseSession(_) => {
                ServiceResponse::CloseSession(CloseSessionResponse {
                    response_header: header,
                })
            }
            ServiceRequest::TransferSubscriptions(r) => {
                ServiceResponse::TransferSubscriptions(TransferSubscriptionsResponse {
                    response_header: header,
                    results: r
                        .subscription_ids
                        .iter()
                        .map(|id| TransferResult {
                            status_code: if id % 2 == 0 {
                                StatusCode::BAD_SUBSCRIPTION_ID_INVALID
                            } else {
                                StatusCode::GOOD
                            },
                            available_sequence_numbers: Vec::new(),
                        })
                        .collect(),
                })
            }
            other => panic!("mock channel does not answer {}", other.name()),
        }
    }
}

impl ChannelClient for MockChannel {
    async fn connect(&self) -> Result<(), SessionError> {
        if let Some(e) = self.connect_failures.lock().pop_front() {
            return Err(e);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(&self, request: ServiceRequest) -> Result<ServiceResponse, SessionError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("not connected".into()));
        }
        self.requests.lock().push(request.clone());

        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(depth, Ordering::SeqCst);
        let result = self.answer(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> Option<EndpointDescription> {
        Some(EndpointDescription {
            endpoint_url: "opc.tcp://mock:4840".into(),
            security_policy_uri: SecurityPolicy::None.uri().into(),
            user_identity_tokens: vec![UserTokenPolicy {
                policy_id: Some("anonymous".into()),
                token_type: UserTokenType::Anonymous,
                security_policy_uri: None,
            }],
            ..Default::default()
        })
    }

    fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy::None
    }

    fn sign(&self, _data: &[u8]) -> Result<ByteString, SessionError> {
        Err(SessionError::Signature("mock channel cannot sign".into()))
    }
}

// ---------------------------------------------------------------------------
// Recording hooks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    pub active: Mutex<Vec<NodeId>>,
    pub inactive: Mutex<Vec<NodeId>>,
}

impl RecordingListener {
    pub fn counts(&self) -> (usize, usize) {
        (self.active.lock().len(), self.inactive.lock().len())
    }
}

impl SessionActivityListener for RecordingListener {
    fn on_session_active(&self, session: &Session) {
        self.active.lock().push(session.session_id.clone());
    }

    fn on_session_inactive(&self, session: &Session) {
        self.inactive.lock().push(session.session_id.clone());
    }
}

#[derive(Default)]
pub struct RecordingSubscriptions {
    pub ids: Mutex<Vec<u32>>,
    pub publishing: Mutex<Vec<bool>>,
    pub transfers: Mutex<Vec<Vec<(u32, StatusCode)>>>,
}

impl SubscriptionManager for RecordingSubscriptions {
    fn start_publishing(&self, reset_counters: bool) {
        self.publishing.lock().push(reset_counters);
    }

    fn subscription_ids(&self) -> Vec<u32> {
        self.ids.lock().clone()
    }

    fn transfer_completed(&self, results: &[(u32, StatusCode)]) {
        self.transfers.lock().push(results.to_vec());
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Receives transitions until one lands in `kind`. Returns everything
/// received along the way, that one included.
pub async fn transitions_until(
    rx: &mut broadcast::Receiver<Transition>,
    kind: SessionStateKind,
) -> Vec<Transition> {
    let mut seen = Vec::new();
    loop {
        let t = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for transition")
            .expect("transition channel closed");
        seen.push(t);
        if t.to == kind {
            return seen;
        }
    }
}

/// Waits until the machine reports `kind`.
pub async fn wait_for_state(fsm: &SessionFsm, kind: SessionStateKind) {
    let mut rx = fsm.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == kind))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Round-trips an event that only `ClosingSession` reacts to, so that
/// every command queued before it has been processed. Returns the state
/// afterwards.
pub async fn barrier(fsm: &SessionFsm) -> SessionStateKind {
    fsm.handle_event(SessionEvent::DisconnectSucceeded)
        .await
        .expect("state machine stopped")
}
