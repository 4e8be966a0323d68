//! # ualink
//!
//! OPC UA client session management over pluggable transports.
//!
//! ualink keeps one session with a server alive for as long as the client
//! wants it. Callers ask for the session whenever they need one; the
//! library creates it, activates it, reactivates it after the connection
//! drops (backing off 0, 1, 2, 4, 8, 16, 16... seconds), re-creates it when
//! the server has forgotten it, and transfers subscriptions onto the new
//! one.
//!
//! ## Crates
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `ualink-transport` | `Connector`/`Connection` traits, WebSocket connector |
//! | `ualink-protocol` | Service messages, status codes, `Codec` |
//! | `ualink-timer` | `Clock`, `Scheduler`, manual clock for tests |
//! | `ualink-cache` | Bounded, write-expiring attribute cache |
//! | `ualink-session` | The session state machine |
//! | `ualink-subscription` | Subscription registry and transfer results |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ualink::prelude::*;
//!
//! # async fn run() -> Result<(), UaClientError> {
//! let client = UaClient::websocket("ws://localhost:4840")
//!     .identity(std::sync::Arc::new(UsernameProvider::new("operator", "secret")))
//!     .build();
//!
//! let session = client.connect().await?;
//! println!("session {} active", session.session_id);
//! client.disconnect().await
//! # }
//! ```

mod client;
mod config;
mod error;
mod stack;

pub use client::{UaClient, UaClientBuilder};
pub use config::{ClientConfig, TransportConfig};
pub use error::UaClientError;
pub use stack::{StackClient, unsecured_endpoint};

pub use ualink_cache as cache;
pub use ualink_protocol as protocol;
pub use ualink_session as session;
pub use ualink_subscription as subscription;
pub use ualink_timer as timer;
pub use ualink_transport as transport;

/// Everything needed to connect, read and write, and follow the session.
pub mod prelude {
    pub use crate::{ClientConfig, TransportConfig, UaClient, UaClientBuilder, UaClientError};
    pub use ualink_cache::CacheConfig;
    pub use ualink_protocol::{AttributeId, DataValue, NodeId, StatusCode, Variant};
    pub use ualink_session::{
        AnonymousProvider, IdentityProvider, Session, SessionActivityListener, SessionConfig,
        SessionError, SessionStateKind, Transition, UsernameProvider,
    };
    pub use ualink_subscription::{Subscription, SubscriptionListener};
}
