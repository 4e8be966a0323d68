//! The session value and session configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use ualink_protocol::{
    ApplicationDescription, ByteString, CreateSessionResponse, NodeId, SignedSoftwareCertificate,
};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// What the client asks for when creating a session.
///
/// Every field has a default, and missing fields fall back to it when
/// deserializing, so a config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Describes this client to the server.
    pub application: ApplicationDescription,
    /// Human-readable session name. Defaults to `ualink-` plus a random
    /// suffix.
    pub session_name: String,
    /// Requested session timeout in milliseconds. The server may revise
    /// it. Default: 120 000.
    pub session_timeout_ms: u64,
    /// How long a request may go unanswered, in milliseconds. Also sent as
    /// the timeout hint of session requests. Default: 60 000.
    pub request_timeout_ms: u64,
    /// Largest response the client accepts, in bytes. 0 means no limit.
    pub max_response_message_size: u32,
    /// DER-encoded client certificate. Null when none is configured.
    pub client_certificate: ByteString,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            application: ApplicationDescription {
                application_uri: "urn:ualink:client".into(),
                product_uri: "urn:ualink".into(),
                application_name: "ualink client".into(),
                ..Default::default()
            },
            session_name: default_session_name(),
            session_timeout_ms: 120_000,
            request_timeout_ms: 60_000,
            max_response_message_size: 0,
            client_certificate: ByteString::NULL,
        }
    }
}

impl SessionConfig {
    /// Sets the session name.
    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    /// Sets the application description.
    pub fn with_application(mut self, application: ApplicationDescription) -> Self {
        self.application = application;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Timeout hint for request headers, saturated to `u32`.
    pub fn timeout_hint(&self) -> u32 {
        u32::try_from(self.request_timeout_ms).unwrap_or(u32::MAX)
    }
}

fn default_session_name() -> String {
    let suffix: u32 = rand::rng().random();
    format!("ualink-{suffix:08x}")
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An authenticated session with a server.
///
/// Held behind an `Arc` by whichever state currently owns it and handed to
/// callers of `get_session`. A session outlives any one connection:
/// reactivating on a new connection keeps `authentication_token` and
/// `session_id`, and only a full re-creation replaces them.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Sent in every request header to bind the request to this session.
    pub authentication_token: NodeId,
    /// Server-assigned session id.
    pub session_id: NodeId,
    /// The name the client chose.
    pub session_name: String,
    /// Timeout the server granted.
    pub session_timeout: Duration,
    /// Largest request the server accepts, in bytes. 0 means no limit.
    pub max_request_size: u32,
    pub server_certificate: ByteString,
    pub server_software_certificates: Vec<SignedSoftwareCertificate>,
    /// Nonce from the last create or activate response; signed on the
    /// next activation.
    pub server_nonce: ByteString,
}

impl Session {
    /// Builds a session from a successful create response.
    pub(crate) fn created(session_name: &str, response: &CreateSessionResponse) -> Self {
        Self {
            authentication_token: response.authentication_token.clone(),
            session_id: response.session_id.clone(),
            session_name: session_name.to_string(),
            session_timeout: Duration::from_millis(response.revised_session_timeout.max(0.0) as u64),
            max_request_size: response.max_request_message_size,
            server_certificate: response.server_certificate.clone(),
            server_software_certificates: response.server_software_certificates.clone(),
            server_nonce: response.server_nonce.clone(),
        }
    }

    /// The same session with the nonce from a later activation.
    pub(crate) fn with_server_nonce(&self, server_nonce: ByteString) -> Self {
        Self {
            server_nonce,
            ..self.clone()
        }
    }

    /// The session carried over to a reactivation: identity and server
    /// parameters are kept, the name comes from the current config and the
    /// nonce from the activate response.
    pub(crate) fn reactivated(&self, session_name: &str, server_nonce: ByteString) -> Self {
        Self {
            session_name: session_name.to_string(),
            server_nonce,
            ..self.clone()
        }
    }
}
