//! Client session lifecycle for ualink.
//!
//! A session is created, activated, kept alive across connection drops and
//! closed by a state machine that runs as its own Tokio task:
//!
//! ```text
//! UaClient (above)        ← asks for sessions, registers listeners
//!     ↕
//! SessionFsm (this crate) ← creates, activates, reactivates, closes
//!     ↕
//! ChannelClient (below)   ← request/response transport to one endpoint
//! ```
//!
//! The moving parts:
//!
//! - [`SessionFsm`]: the handle callers use. [`SessionFsm::get_session`]
//!   returns the active session or joins the attempt to create one.
//! - [`ChannelClient`]: what the machine needs from the transport.
//! - [`IdentityProvider`]: the user identity presented on activation.
//! - [`SessionActivityListener`] and [`SubscriptionManager`]: callbacks on
//!   active/inactive edges and on (re)activation.
//!
//! After a connection drop the machine reactivates the same session,
//! waiting 0, 1, 2, 4, 8 and then 16 seconds between attempts. If the
//! server reports the session gone, a new one is created instead.

mod activate;
mod channel;
mod error;
mod event;
mod fsm;
mod hooks;
mod identity;
mod session;
mod state;

pub use channel::{ChannelClient, ChannelEvent};
pub use error::SessionError;
pub use event::{MAX_REACTIVATE_DELAY_SECS, SessionEvent, SessionStateKind, Transition, next_delay};
pub use fsm::{SessionFsm, SessionFsmBuilder};
pub use hooks::{ListenerId, SessionActivityListener, SubscriptionManager};
pub use identity::{AnonymousProvider, IdentityProvider, UsernameProvider};
pub use session::{Session, SessionConfig};
