//! Wire protocol for ualink.
//!
//! This crate defines what an OPC UA client and server exchange:
//!
//! - **Identifiers** ([`NodeId`], [`AttributeId`]) for addressing node
//!   attributes.
//! - **Status codes** ([`StatusCode`]) including the set that marks a
//!   session as unrecoverable.
//! - **Types and messages** ([`EndpointDescription`], [`ServiceRequest`],
//!   [`ServiceResponse`], [`Envelope`]) for the session, subscription
//!   transfer and attribute services.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) for turning envelopes into
//!   bytes.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw bytes) and the
//! session layer (session lifecycle). It knows nothing about connections
//! or state machines.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (state machine)
//! ```

mod codec;
mod error;
mod ids;
mod messages;
mod status;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use ids::{AttributeId, Identifier, NodeId};
pub use messages::{
    ActivateSessionRequest, ActivateSessionResponse, CloseSessionRequest, CloseSessionResponse,
    CreateSessionRequest, CreateSessionResponse, Envelope, ReadRequest, ReadResponse,
    ReadValueId, RequestEnvelope, RequestHeader, ResponseEnvelope, ResponseHeader,
    ServiceFault, ServiceRequest, ServiceResponse, TransferResult, TransferSubscriptionsRequest,
    TransferSubscriptionsResponse, WriteRequest, WriteResponse, WriteValue,
};
pub use status::StatusCode;
pub use types::{
    ApplicationDescription, ApplicationType, ByteString, DataValue, EndpointDescription,
    MessageSecurityMode, SecurityPolicy, SignatureData, SignedSoftwareCertificate,
    UserIdentityToken, UserTokenPolicy, UserTokenType, Variant,
};
