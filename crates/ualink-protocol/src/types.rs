//! Structured data types shared by the service messages.
//!
//! These are the building blocks the session layer passes around:
//! endpoint and application descriptions, security policies, identity
//! tokens, signatures, and the `DataValue` returned by attribute reads.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NodeId, StatusCode};

// ---------------------------------------------------------------------------
// ByteString
// ---------------------------------------------------------------------------

/// An OPC UA byte string. Unlike `Vec<u8>` it distinguishes "null" from
/// "empty", which matters for nonces and certificates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteString(pub Option<Vec<u8>>);

impl ByteString {
    /// The null byte string.
    pub const NULL: ByteString = ByteString(None);

    /// Wraps the given bytes.
    pub fn of(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Some(bytes.into()))
    }

    /// Returns `true` for the null byte string.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// The bytes, treating null as empty.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }

    /// Number of bytes, treating null as empty.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` for null or zero-length byte strings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Some(bytes))
    }
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

/// The security policy in force on a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityPolicy {
    #[default]
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
}

impl SecurityPolicy {
    /// The policy URI as it appears in endpoint descriptions.
    pub fn uri(self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
        }
    }

    /// URI of the asymmetric signature algorithm used for client
    /// signatures. `None` for the `None` policy.
    pub fn asymmetric_signature_uri(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Basic128Rsa15 | Self::Basic256 => {
                Some("http://www.w3.org/2000/09/xmldsig#rsa-sha1")
            }
            Self::Basic256Sha256 => {
                Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
            }
        }
    }

    /// Looks a policy up by URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        [
            Self::None,
            Self::Basic128Rsa15,
            Self::Basic256,
            Self::Basic256Sha256,
        ]
        .into_iter()
        .find(|p| p.uri() == uri)
    }
}

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessageSecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

/// A signature plus the URI of the algorithm that produced it.
///
/// The default value (no algorithm, null signature) is what is sent when
/// no security policy is in force.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignatureData {
    pub algorithm: Option<String>,
    pub signature: ByteString,
}

impl SignatureData {
    /// Returns `true` if no signature is present.
    pub fn is_empty(&self) -> bool {
        self.algorithm.is_none() && self.signature.is_empty()
    }
}

/// A software certificate with its signature, as returned by the server
/// at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedSoftwareCertificate {
    pub certificate_data: ByteString,
    pub signature: ByteString,
}

// ---------------------------------------------------------------------------
// Application and endpoint descriptions
// ---------------------------------------------------------------------------

/// What kind of application a description refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApplicationType {
    Server,
    #[default]
    Client,
    ClientAndServer,
    DiscoveryServer,
}

/// Describes an OPC UA application (this client, or a server).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationDescription {
    pub application_uri: String,
    pub product_uri: String,
    pub application_name: String,
    pub application_type: ApplicationType,
    /// Non-empty when the server is reached through a gateway.
    #[serde(default)]
    pub gateway_server_uri: Option<String>,
}

/// The kinds of user identity token a server may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserTokenType {
    Anonymous,
    UserName,
    Certificate,
    IssuedToken,
}

/// One identity token policy advertised by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokenPolicy {
    pub policy_id: Option<String>,
    pub token_type: UserTokenType,
    #[serde(default)]
    pub security_policy_uri: Option<String>,
}

/// A server endpoint the client connects to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub endpoint_url: String,
    pub server: ApplicationDescription,
    pub server_certificate: ByteString,
    pub security_mode: MessageSecurityMode,
    pub security_policy_uri: String,
    pub user_identity_tokens: Vec<UserTokenPolicy>,
}

impl EndpointDescription {
    /// The security policy named by `security_policy_uri`, if recognised.
    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        SecurityPolicy::from_uri(&self.security_policy_uri)
    }

    /// First token policy of the given type.
    pub fn token_policy(&self, token_type: UserTokenType) -> Option<&UserTokenPolicy> {
        self.user_identity_tokens
            .iter()
            .find(|t| t.token_type == token_type)
    }
}

// ---------------------------------------------------------------------------
// User identity tokens
// ---------------------------------------------------------------------------

/// The identity presented when activating a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UserIdentityToken {
    Anonymous {
        policy_id: String,
    },
    UserName {
        policy_id: String,
        user_name: String,
        password: ByteString,
        encryption_algorithm: Option<String>,
    },
}

impl UserIdentityToken {
    /// The policy id this token was built for.
    pub fn policy_id(&self) -> &str {
        match self {
            Self::Anonymous { policy_id } | Self::UserName { policy_id, .. } => policy_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A scalar attribute value.
///
/// Only the built-in types the client itself needs to inspect are spelled
/// out; anything else travels as its JSON encoding in `Other`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    ByteString(ByteString),
    NodeId(NodeId),
    StatusCode(StatusCode),
    LocalizedText {
        locale: Option<String>,
        text: String,
    },
    QualifiedName {
        namespace: u16,
        name: String,
    },
    Other(String),
}

/// A value together with its status and timestamps, as read from a server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    /// Milliseconds since the Unix epoch.
    pub source_timestamp: Option<u64>,
    /// Milliseconds since the Unix epoch.
    pub server_timestamp: Option<u64>,
}

impl DataValue {
    /// A good value without timestamps.
    pub fn new(value: Variant) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// A value-less data value carrying only a status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "<empty>"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Self::NodeId(v) => write!(f, "{v}"),
            Self::StatusCode(v) => write!(f, "{v}"),
            Self::LocalizedText { text, .. } => write!(f, "{text}"),
            Self::QualifiedName { namespace, name } => write!(f, "{namespace}:{name}"),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}
