//! What each state does when it is entered and left.
//!
//! `activate` runs on the state machine task right after a transition.
//! It may await network operations; events arriving meanwhile queue up
//! behind it. Its outcome is returned as a follow-up event, which the
//! actor queues like any other. Events raised later from other tasks
//! (the connection watcher, the reactivation timer) go through an
//! [`EventSink`] tagged with the epoch of the state that raised them, so
//! the actor can drop them once that state is gone.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use ualink_protocol::{
    ActivateSessionRequest, ByteString, CloseSessionRequest, CreateSessionRequest, NodeId,
    RequestHeader, SecurityPolicy, ServiceRequest, ServiceResponse, SignatureData, StatusCode,
    TransferSubscriptionsRequest,
};
use ualink_timer::Scheduler;

use crate::fsm::Command;
use crate::state::SessionState;
use crate::{
    ChannelClient, ChannelEvent, IdentityProvider, Session, SessionConfig, SessionError,
    SessionEvent, SubscriptionManager,
};

/// Timeout hint sent with CloseSession, in milliseconds.
const CLOSE_TIMEOUT_HINT_MS: u32 = 5_000;

/// Length of the client nonce sent with CreateSession.
const CLIENT_NONCE_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a state needs from the outside world.
pub(crate) struct StateContext<C> {
    pub(crate) channel: Arc<C>,
    pub(crate) config: SessionConfig,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) subscriptions: Option<Arc<dyn SubscriptionManager>>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
}

/// Raises events into the state machine from outside its task.
///
/// Holds a weak sender so a forgotten timer or watcher does not keep the
/// actor alive.
#[derive(Clone)]
pub(crate) struct EventSink {
    pub(crate) tx: mpsc::WeakUnboundedSender<Command>,
    pub(crate) epoch: u64,
}

impl EventSink {
    pub(crate) fn raise(&self, event: SessionEvent) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let _ = tx.send(Command::Event {
            event,
            origin: Some(self.epoch),
            reply: None,
        });
    }
}

fn unexpected(expected: &'static str, actual: &ServiceResponse) -> SessionError {
    SessionError::UnexpectedResponse {
        expected,
        actual: actual.name(),
    }
}

// ---------------------------------------------------------------------------
// Enter / leave
// ---------------------------------------------------------------------------

impl SessionState {
    /// Runs the entry behaviour of this state. `event` is the one that led
    /// here.
    pub(crate) async fn activate<C: ChannelClient>(
        &mut self,
        event: SessionEvent,
        ctx: &StateContext<C>,
        sink: &EventSink,
    ) -> Option<SessionEvent> {
        match self {
            // Reached from a create or activate that did not finish. The
            // channel it connected must not outlive it.
            Self::Inactive { abandoned } => {
                if event == SessionEvent::DisconnectSucceeded {
                    return None;
                }
                if let Some(session) = abandoned.take() {
                    close_session(ctx, &session).await;
                }
                if let Err(e) = ctx.channel.disconnect().await {
                    warn!(%event, error = %e, "disconnect failed");
                }
                None
            }

            Self::CreatingSession { waiters, created } => match create_session(ctx).await {
                Ok(session) => {
                    debug!(
                        session_id = %session.session_id,
                        timeout_ms = session.session_timeout.as_millis() as u64,
                        "session created"
                    );
                    *created = Some(Arc::new(session));
                    Some(SessionEvent::CreateSucceeded)
                }
                Err(e) => {
                    warn!(error = %e, "create session failed");
                    waiters.fail(&e);
                    Some(SessionEvent::ErrCreateFailed)
                }
            },

            Self::ActivatingSession { waiters, session } => {
                match activate_session(ctx, session).await {
                    Ok(nonce) => {
                        debug!(session_id = %session.session_id, "session activated");
                        *session = Arc::new(session.with_server_nonce(nonce));
                        Some(SessionEvent::ActivateSucceeded)
                    }
                    Err(e) => {
                        warn!(session_id = %session.session_id, error = %e, "activate session failed");
                        waiters.fail(&e);
                        Some(SessionEvent::ErrActivateFailed)
                    }
                }
            }

            Self::Active {
                session, watcher, ..
            } => {
                let events = ctx.channel.subscribe();
                *watcher = Some(tokio::spawn(watch_channel(events, sink.clone())));
                if !ctx.channel.is_connected() {
                    // Lost between the last response and the subscription.
                    return Some(SessionEvent::ErrConnectionLost);
                }

                let fresh = event == SessionEvent::ActivateSucceeded;
                if let Some(subscriptions) = &ctx.subscriptions {
                    if fresh {
                        transfer_subscriptions(ctx, subscriptions.as_ref(), session).await;
                    }
                    subscriptions.start_publishing(fresh);
                }
                None
            }

            Self::ClosingSession { session, .. } => {
                close_session(ctx, session).await;
                if let Err(e) = ctx.channel.disconnect().await {
                    warn!(error = %e, "disconnect failed");
                }
                Some(SessionEvent::DisconnectSucceeded)
            }

            Self::ReactivateDelay {
                delay_secs, timer, ..
            } => {
                if let Some(old) = timer.take() {
                    old.cancel();
                }
                debug!(delay_secs = *delay_secs, "reactivation scheduled");
                let sink = sink.clone();
                *timer = Some(ctx.scheduler.schedule(
                    Duration::from_secs(*delay_secs),
                    Box::new(move || sink.raise(SessionEvent::ReactivateRequested)),
                ));
                None
            }

            Self::ReactivateExecute {
                previous,
                waiters,
                session,
                ..
            } => match reactivate(ctx, previous).await {
                Ok(nonce) => {
                    debug!(session_id = %previous.session_id, "session reactivated");
                    *session = Some(Arc::new(
                        previous.reactivated(&ctx.config.session_name, nonce),
                    ));
                    Some(SessionEvent::ReactivateSucceeded)
                }
                Err(e) => {
                    waiters.fail(&e);
                    if e.status_code().is_session_invalid() {
                        warn!(session_id = %previous.session_id, error = %e, "session no longer valid");
                        Some(SessionEvent::ErrReactivateInvalid)
                    } else {
                        debug!(session_id = %previous.session_id, error = %e, "reactivation failed");
                        Some(SessionEvent::ErrReactivateFailed)
                    }
                }
            },
        }
    }

    /// Runs the exit behaviour of this state.
    pub(crate) fn deactivate(&mut self) {
        match self {
            Self::Active { watcher, .. } => {
                if let Some(watcher) = watcher.take() {
                    watcher.abort();
                }
            }
            Self::ClosingSession { completions, .. } => {
                for done in completions.drain(..) {
                    let _ = done.send(());
                }
            }
            Self::ReactivateDelay { timer, .. } => {
                if let Some(timer) = timer.take() {
                    timer.cancel();
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

async fn create_session<C: ChannelClient>(ctx: &StateContext<C>) -> Result<Session, SessionError> {
    ctx.channel.connect().await?;
    let endpoint = ctx.channel.endpoint().ok_or(SessionError::NoEndpoint)?;

    let server_uri = endpoint
        .server
        .gateway_server_uri
        .as_deref()
        .filter(|uri| !uri.is_empty())
        .map(|_| endpoint.server.application_uri.clone());

    let mut nonce = [0u8; CLIENT_NONCE_LEN];
    rand::rng().fill(&mut nonce[..]);

    let request = ServiceRequest::CreateSession(CreateSessionRequest {
        request_header: RequestHeader::new(NodeId::NULL, ctx.config.timeout_hint()),
        client_description: ctx.config.application.clone(),
        server_uri,
        endpoint_url: endpoint.endpoint_url.clone(),
        session_name: ctx.config.session_name.clone(),
        client_nonce: ByteString::of(nonce),
        client_certificate: ctx.config.client_certificate.clone(),
        requested_session_timeout: ctx.config.session_timeout_ms as f64,
        max_response_message_size: ctx.config.max_response_message_size,
    });

    match ctx.channel.send_request(request).await? {
        ServiceResponse::CreateSession(response) => {
            Ok(Session::created(&ctx.config.session_name, &response))
        }
        other => Err(unexpected("CreateSession", &other)),
    }
}

/// Best-effort CloseSession. Failures are logged and otherwise ignored.
async fn close_session<C: ChannelClient>(ctx: &StateContext<C>, session: &Session) {
    let request = ServiceRequest::CloseSession(CloseSessionRequest {
        request_header: RequestHeader::new(
            session.authentication_token.clone(),
            CLOSE_TIMEOUT_HINT_MS,
        ),
        delete_subscriptions: true,
    });
    match ctx.channel.send_request(request).await {
        Ok(_) => info!(session_id = %session.session_id, "session closed"),
        Err(e) => warn!(session_id = %session.session_id, error = %e, "close session failed"),
    }
}

/// Activates `session` on the current connection. Returns the new server
/// nonce.
async fn activate_session<C: ChannelClient>(
    ctx: &StateContext<C>,
    session: &Session,
) -> Result<ByteString, SessionError> {
    let endpoint = ctx.channel.endpoint().ok_or(SessionError::NoEndpoint)?;
    let (user_identity_token, user_token_signature) = ctx
        .identity
        .identity_token(&endpoint, &session.server_nonce)?;
    let client_signature = client_signature(ctx, session)?;

    let request = ServiceRequest::ActivateSession(ActivateSessionRequest {
        request_header: RequestHeader::new(
            session.authentication_token.clone(),
            ctx.config.timeout_hint(),
        ),
        client_signature,
        client_software_certificates: Vec::new(),
        locale_ids: Vec::new(),
        user_identity_token,
        user_token_signature,
    });

    match ctx.channel.send_request(request).await? {
        ServiceResponse::ActivateSession(response) => Ok(response.server_nonce),
        other => Err(unexpected("ActivateSession", &other)),
    }
}

/// Signs server certificate + server nonce under the channel's policy.
fn client_signature<C: ChannelClient>(
    ctx: &StateContext<C>,
    session: &Session,
) -> Result<SignatureData, SessionError> {
    let policy = ctx.channel.security_policy();
    let Some(algorithm) = policy.asymmetric_signature_uri() else {
        debug_assert_eq!(policy, SecurityPolicy::None);
        return Ok(SignatureData::default());
    };

    let mut data = session.server_certificate.as_bytes().to_vec();
    data.extend_from_slice(session.server_nonce.as_bytes());
    let signature = ctx.channel.sign(&data)?;
    Ok(SignatureData {
        algorithm: Some(algorithm.to_string()),
        signature,
    })
}

async fn reactivate<C: ChannelClient>(
    ctx: &StateContext<C>,
    previous: &Session,
) -> Result<ByteString, SessionError> {
    ctx.channel.connect().await?;
    activate_session(ctx, previous).await
}

/// Transfers subscriptions left over from an earlier session and reports
/// the per-subscription outcome.
async fn transfer_subscriptions<C: ChannelClient>(
    ctx: &StateContext<C>,
    subscriptions: &dyn SubscriptionManager,
    session: &Session,
) {
    let ids = subscriptions.subscription_ids();
    if ids.is_empty() {
        return;
    }

    let request = ServiceRequest::TransferSubscriptions(TransferSubscriptionsRequest {
        request_header: RequestHeader::new(
            session.authentication_token.clone(),
            ctx.config.timeout_hint(),
        ),
        subscription_ids: ids.clone(),
        send_initial_values: true,
    });

    let results: Vec<(u32, StatusCode)> = match ctx.channel.send_request(request).await {
        Ok(ServiceResponse::TransferSubscriptions(response)) => ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let status = response
                    .results
                    .get(i)
                    .map(|r| r.status_code)
                    .unwrap_or(StatusCode::BAD_UNEXPECTED_ERROR);
                (*id, status)
            })
            .collect(),
        Ok(other) => {
            let status = unexpected("TransferSubscriptions", &other).status_code();
            ids.iter().map(|id| (*id, status)).collect()
        }
        Err(e) => {
            debug!(error = %e, count = ids.len(), "transfer subscriptions failed");
            ids.iter().map(|id| (*id, e.status_code())).collect()
        }
    };

    let failed = results.iter().filter(|(_, s)| !s.is_good()).count();
    debug!(
        transferred = results.len() - failed,
        failed, "subscription transfer completed"
    );
    subscriptions.transfer_completed(&results);
}

/// Turns channel notifications into session events while `Active`.
async fn watch_channel(mut events: broadcast::Receiver<ChannelEvent>, sink: EventSink) {
    loop {
        match events.recv().await {
            Ok(ChannelEvent::Inactive) | Err(broadcast::error::RecvError::Closed) => {
                warn!("channel lost");
                sink.raise(SessionEvent::ErrConnectionLost);
                return;
            }
            Ok(ChannelEvent::ServiceFault(status)) if status == StatusCode::BAD_SESSION_ID_INVALID => {
                warn!(%status, "server reports session invalid");
                sink.raise(SessionEvent::ErrSessionInvalid);
                return;
            }
            Ok(ChannelEvent::ServiceFault(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "channel watcher lagged");
            }
        }
    }
}
