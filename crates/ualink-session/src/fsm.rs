//! The session state machine actor and its handle.
//!
//! One spawned task owns the current [`SessionState`] and processes
//! commands from an mpsc queue one at a time. A transition, including the
//! entry behaviour of the new state, completes before the next command is
//! looked at, so at most one transition is ever in flight. Everything else
//! (handles, the connection watcher, the reactivation timer) talks to the
//! actor through that queue.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};
use ualink_timer::{Scheduler, TokioScheduler};

use crate::activate::{EventSink, StateContext};
use crate::hooks::ListenerRegistry;
use crate::state::{SessionReply, SessionState};
use crate::{
    AnonymousProvider, ChannelClient, IdentityProvider, ListenerId, Session,
    SessionActivityListener, SessionConfig, SessionError, SessionEvent, SessionStateKind,
    SubscriptionManager, Transition,
};

/// Capacity of the transition broadcast. Slow subscribers skip ahead.
const TRANSITION_CAPACITY: usize = 64;

/// Commands sent to the state machine actor.
pub(crate) enum Command {
    /// Apply an event. `origin` is the epoch of the state that raised it,
    /// `None` for events from a handle.
    Event {
        event: SessionEvent,
        origin: Option<u64>,
        reply: Option<oneshot::Sender<SessionStateKind>>,
    },

    /// Deliver the session once it is active, starting one if needed.
    GetSession { reply: SessionReply },

    /// Close the session and wait until the machine has left
    /// `ClosingSession`.
    Disconnect { reply: oneshot::Sender<()> },
}

// ---------------------------------------------------------------------------
// SessionFsm (handle)
// ---------------------------------------------------------------------------

/// Handle to a running session state machine.
///
/// Cheap to clone. The actor stops once every handle is dropped; a session
/// that is still open at that point is not closed on the server.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use ualink_session::{ChannelClient, SessionFsm};
/// # async fn run<C: ChannelClient>(channel: Arc<C>) -> Result<(), ualink_session::SessionError> {
/// let fsm = SessionFsm::builder(channel).spawn();
/// let session = fsm.get_session().await?;
/// println!("session {} active", session.session_id);
/// fsm.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionFsm {
    sender: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionStateKind>,
    transitions: broadcast::Sender<Transition>,
    listeners: ListenerRegistry,
}

impl SessionFsm {
    /// Starts building a state machine on top of `channel`.
    pub fn builder<C: ChannelClient>(channel: Arc<C>) -> SessionFsmBuilder<C> {
        SessionFsmBuilder::new(channel)
    }

    /// Returns the active session, creating and activating one first if
    /// there is none.
    ///
    /// If a session is already active it is returned without raising any
    /// event. Otherwise the caller joins whatever attempt is in progress.
    ///
    /// # Errors
    /// The error that ended the attempt, or [`SessionError::SessionClosed`]
    /// if it was abandoned (for example by a concurrent
    /// [`disconnect`](Self::disconnect)).
    pub async fn get_session(&self) -> Result<Arc<Session>, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::GetSession { reply: reply_tx })?;
        reply_rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Applies `event` and returns the state the machine is in afterwards.
    ///
    /// Follow-up events produced by the new state (for example
    /// `CreateSucceeded`) are queued and have not been applied yet when
    /// this returns.
    pub async fn handle_event(&self, event: SessionEvent) -> Result<SessionStateKind, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Event {
            event,
            origin: None,
            reply: Some(reply_tx),
        })?;
        reply_rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Queues `event` without waiting for it to be applied.
    pub fn raise(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.send(Command::Event {
            event,
            origin: None,
            reply: None,
        })
    }

    /// Closes the session, if any, and disconnects the channel.
    ///
    /// A creation still in progress is abandoned; a session the server
    /// already created for it is closed and the connection dropped. Resolves once the machine has left `ClosingSession`, or
    /// right after the transition if there was nothing to close.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Disconnect { reply: reply_tx })?;
        reply_rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// The state the machine was in after its last transition.
    pub fn state(&self) -> SessionStateKind {
        *self.state.borrow()
    }

    /// A receiver that is notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionStateKind> {
        self.state.clone()
    }

    /// Every transition from now on, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Registers a listener for active/inactive edges.
    pub fn add_listener(&self, listener: Arc<dyn SessionActivityListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Unregisters a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.sender.send(command).map_err(|_| SessionError::Shutdown)
    }
}

impl std::fmt::Debug for SessionFsm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFsm")
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and spawns a [`SessionFsm`].
pub struct SessionFsmBuilder<C> {
    channel: Arc<C>,
    config: SessionConfig,
    identity: Arc<dyn IdentityProvider>,
    subscriptions: Option<Arc<dyn SubscriptionManager>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<C: ChannelClient> SessionFsmBuilder<C> {
    fn new(channel: Arc<C>) -> Self {
        Self {
            channel,
            config: SessionConfig::default(),
            identity: Arc::new(AnonymousProvider),
            subscriptions: None,
            scheduler: Arc::new(TokioScheduler),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity presented on activation. Default: anonymous.
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn subscriptions(mut self, subscriptions: Arc<dyn SubscriptionManager>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    /// Scheduler for reactivation delays. Default: [`TokioScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Spawns the actor on the current Tokio runtime.
    ///
    /// # Panics
    /// If called outside a Tokio runtime.
    pub fn spawn(self) -> SessionFsm {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionStateKind::Inactive);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let listeners = ListenerRegistry::default();

        let actor = FsmActor {
            ctx: StateContext {
                channel: self.channel,
                config: self.config,
                identity: self.identity,
                subscriptions: self.subscriptions,
                scheduler: self.scheduler,
            },
            state: SessionState::inactive(),
            epoch: 0,
            receiver,
            self_tx: sender.downgrade(),
            state_tx,
            transitions: transitions.clone(),
            listeners: listeners.clone(),
        };
        tokio::spawn(actor.run());

        SessionFsm {
            sender,
            state: state_rx,
            transitions,
            listeners,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct FsmActor<C> {
    ctx: StateContext<C>,
    state: SessionState,
    /// Bumped on every transition. Events raised by a state carry the
    /// epoch it was entered in and are dropped once it has moved on.
    epoch: u64,
    receiver: mpsc::UnboundedReceiver<Command>,
    self_tx: mpsc::WeakUnboundedSender<Command>,
    state_tx: watch::Sender<SessionStateKind>,
    transitions: broadcast::Sender<Transition>,
    listeners: ListenerRegistry,
}

impl<C: ChannelClient> FsmActor<C> {
    async fn run(mut self) {
        info!(session_name = %self.ctx.config.session_name, "session state machine started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                Command::Event {
                    event,
                    origin: Some(origin),
                    ..
                } if origin != self.epoch => {
                    debug!(%event, origin, epoch = self.epoch, "stale event dropped");
                }
                Command::Event { event, reply, .. } => {
                    self.handle_event(event, None).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(self.state.kind());
                    }
                }
                Command::GetSession { reply } => {
                    if let Some(session) = self.state.active_session() {
                        let _ = reply.send(Ok(session.clone()));
                    } else {
                        self.handle_event(SessionEvent::SessionRequested, Some(reply))
                            .await;
                    }
                }
                Command::Disconnect { reply } => {
                    self.handle_event(SessionEvent::DisconnectRequested, None)
                        .await;
                    match &mut self.state {
                        SessionState::ClosingSession { completions, .. } => {
                            completions.push(reply);
                        }
                        _ => {
                            let _ = reply.send(());
                        }
                    }
                }
            }
        }

        self.state.deactivate();
        info!(state = %self.state.kind(), "session state machine stopped");
    }

    async fn handle_event(&mut self, event: SessionEvent, waiter: Option<SessionReply>) {
        let Some(next) = self.state.transition(event) else {
            debug!(state = %self.state.kind(), %event, "event ignored");
            if let Some(waiter) = waiter {
                self.state.attach(waiter);
            }
            return;
        };

        let from = self.state.kind();
        let to = next.kind();
        let mut previous = std::mem::replace(&mut self.state, next);
        let lost_session = previous.active_session().cloned();

        self.epoch += 1;
        let transition = Transition { from, event, to };
        debug!(epoch = self.epoch, "{transition}");

        // Published before the old state's completions fire, so a woken
        // `disconnect()` caller already reads the new state.
        self.state_tx.send_replace(to);
        let _ = self.transitions.send(transition);
        previous.deactivate();
        drop(previous);
        if let Some(session) = lost_session {
            info!(session_id = %session.session_id, %event, "session inactive");
            self.listeners.notify_inactive(&session);
        }

        if let Some(waiter) = waiter {
            self.state.attach(waiter);
        }
        let sink = EventSink {
            tx: self.self_tx.clone(),
            epoch: self.epoch,
        };
        let follow_up = self.state.activate(event, &self.ctx, &sink).await;

        // Listeners hear about the session before the callers waiting on it.
        if let SessionState::Active {
            session, waiters, ..
        } = &mut self.state
        {
            info!(session_id = %session.session_id, %event, "session active");
            self.listeners.notify_active(session);
            waiters.resolve(session);
        }
        if let Some(follow_up) = follow_up {
            sink.raise(follow_up);
        }
    }
}
