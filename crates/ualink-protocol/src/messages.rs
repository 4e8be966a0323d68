//! Service request and response messages.
//!
//! Only the services the session lifecycle and the attribute cache need
//! are modelled: session management, subscription transfer, and single
//! attribute read/write. Every message that travels on the wire is wrapped
//! in an [`Envelope`] carrying the request handle used to pair a response
//! with its request.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{
    ApplicationDescription, AttributeId, ByteString, DataValue, EndpointDescription, NodeId,
    SignatureData, SignedSoftwareCertificate, StatusCode, UserIdentityToken,
};

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Common header of every request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestHeader {
    /// The session's authentication token; null before a session exists.
    pub authentication_token: NodeId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Client-assigned handle echoed back in the response header.
    pub request_handle: u32,
    /// How long the client is willing to wait, in milliseconds.
    pub timeout_hint: u32,
}

impl RequestHeader {
    /// A header stamped with the current time. The request handle is left
    /// at 0 for the channel to assign.
    pub fn new(authentication_token: NodeId, timeout_hint: u32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            authentication_token,
            timestamp,
            request_handle: 0,
            timeout_hint,
        }
    }
}

/// Common header of every response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub request_handle: u32,
    pub service_result: StatusCode,
}

impl ResponseHeader {
    /// A good response header for the given request handle.
    pub fn good(request_handle: u32) -> Self {
        Self {
            request_handle,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Session services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub request_header: RequestHeader,
    pub client_description: ApplicationDescription,
    /// Only sent when the server is reached through a gateway.
    pub server_uri: Option<String>,
    pub endpoint_url: String,
    pub session_name: String,
    pub client_nonce: ByteString,
    pub client_certificate: ByteString,
    /// Milliseconds.
    pub requested_session_timeout: f64,
    pub max_response_message_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub response_header: ResponseHeader,
    pub session_id: NodeId,
    pub authentication_token: NodeId,
    /// Milliseconds.
    pub revised_session_timeout: f64,
    pub server_nonce: ByteString,
    pub server_certificate: ByteString,
    pub server_endpoints: Vec<EndpointDescription>,
    pub server_software_certificates: Vec<SignedSoftwareCertificate>,
    pub server_signature: SignatureData,
    pub max_request_message_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateSessionRequest {
    pub request_header: RequestHeader,
    pub client_signature: SignatureData,
    pub client_software_certificates: Vec<SignedSoftwareCertificate>,
    pub locale_ids: Vec<String>,
    pub user_identity_token: UserIdentityToken,
    pub user_token_signature: SignatureData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateSessionResponse {
    pub response_header: ResponseHeader,
    pub server_nonce: ByteString,
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub request_header: RequestHeader,
    pub delete_subscriptions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub response_header: ResponseHeader,
}

// ---------------------------------------------------------------------------
// Subscription transfer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSubscriptionsRequest {
    pub request_header: RequestHeader,
    pub subscription_ids: Vec<u32>,
    pub send_initial_values: bool,
}

/// Outcome of transferring one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub status_code: StatusCode,
    pub available_sequence_numbers: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSubscriptionsResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<TransferResult>,
}

// ---------------------------------------------------------------------------
// Attribute services
// ---------------------------------------------------------------------------

/// Identifies one attribute of one node to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub request_header: RequestHeader,
    /// Milliseconds; 0 asks the server for a fresh value.
    pub max_age: f64,
    pub nodes_to_read: Vec<ReadValueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<DataValue>,
}

/// One attribute write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteValue {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub request_header: RequestHeader,
    pub nodes_to_write: Vec<WriteValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub response_header: ResponseHeader,
    pub results: Vec<StatusCode>,
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// Returned in place of the expected response when a service fails as a
/// whole. The reason is the header's `service_result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFault {
    pub response_header: ResponseHeader,
}

// ---------------------------------------------------------------------------
// Request / response unions
// ---------------------------------------------------------------------------

/// Any request the client sends.
///
/// `#[serde(tag = "type")]` makes the JSON carry the service name inline:
/// `{ "type": "CloseSession", "request_header": {...}, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceRequest {
    CreateSession(CreateSessionRequest),
    ActivateSession(ActivateSessionRequest),
    CloseSession(CloseSessionRequest),
    TransferSubscriptions(TransferSubscriptionsRequest),
    Read(ReadRequest),
    Write(WriteRequest),
}

impl ServiceRequest {
    /// The request's header.
    pub fn header(&self) -> &RequestHeader {
        match self {
            Self::CreateSession(r) => &r.request_header,
            Self::ActivateSession(r) => &r.request_header,
            Self::CloseSession(r) => &r.request_header,
            Self::TransferSubscriptions(r) => &r.request_header,
            Self::Read(r) => &r.request_header,
            Self::Write(r) => &r.request_header,
        }
    }

    /// Mutable access to the request's header.
    pub fn header_mut(&mut self) -> &mut RequestHeader {
        match self {
            Self::CreateSession(r) => &mut r.request_header,
            Self::ActivateSession(r) => &mut r.request_header,
            Self::CloseSession(r) => &mut r.request_header,
            Self::TransferSubscriptions(r) => &mut r.request_header,
            Self::Read(r) => &mut r.request_header,
            Self::Write(r) => &mut r.request_header,
        }
    }

    /// Service name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession(_) => "CreateSession",
            Self::ActivateSession(_) => "ActivateSession",
            Self::CloseSession(_) => "CloseSession",
            Self::TransferSubscriptions(_) => "TransferSubscriptions",
            Self::Read(_) => "Read",
            Self::Write(_) => "Write",
        }
    }
}

/// Any response the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceResponse {
    CreateSession(CreateSessionResponse),
    ActivateSession(ActivateSessionResponse),
    CloseSession(CloseSessionResponse),
    TransferSubscriptions(TransferSubscriptionsResponse),
    Read(ReadResponse),
    Write(WriteResponse),
    ServiceFault(ServiceFault),
}

impl ServiceResponse {
    /// The response's header.
    pub fn header(&self) -> &ResponseHeader {
        match self {
            Self::CreateSession(r) => &r.response_header,
            Self::ActivateSession(r) => &r.response_header,
            Self::CloseSession(r) => &r.response_header,
            Self::TransferSubscriptions(r) => &r.response_header,
            Self::Read(r) => &r.response_header,
            Self::Write(r) => &r.response_header,
            Self::ServiceFault(r) => &r.response_header,
        }
    }

    /// Service name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession(_) => "CreateSession",
            Self::ActivateSession(_) => "ActivateSession",
            Self::CloseSession(_) => "CloseSession",
            Self::TransferSubscriptions(_) => "TransferSubscriptions",
            Self::Read(_) => "Read",
            Self::Write(_) => "Write",
            Self::ServiceFault(_) => "ServiceFault",
        }
    }

    /// The service result if the whole call failed (a `ServiceFault`, or
    /// any response whose header reports a bad result).
    pub fn fault(&self) -> Option<StatusCode> {
        let result = self.header().service_result;
        match self {
            Self::ServiceFault(_) => Some(result),
            _ if result.is_bad() => Some(result),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope — one frame on the wire
// ---------------------------------------------------------------------------

/// The top-level wire frame. Every message is sent inside an envelope so
/// the receiver can pair responses with requests without looking inside
/// the body.
///
/// ```text
/// { "request_handle": 7, "body": { "type": "Read", ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<B> {
    pub request_handle: u32,
    pub body: B,
}

/// An envelope travelling client → server.
pub type RequestEnvelope = Envelope<ServiceRequest>;

/// An envelope travelling server → client.
pub type ResponseEnvelope = Envelope<ServiceResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    fn close_request(handle: u32) -> ServiceRequest {
        ServiceRequest::CloseSession(CloseSessionRequest {
            request_header: RequestHeader {
                request_handle: handle,
                ..Default::default()
            },
            delete_subscriptions: true,
        })
    }

    #[test]
    fn test_request_json_is_internally_tagged() {
        let json = serde_json::to_value(close_request(3)).unwrap();
        assert_eq!(json["type"], "CloseSession");
        assert_eq!(json["delete_subscriptions"], true);
        assert_eq!(json["request_header"]["request_handle"], 3);
    }

    #[test]
    fn test_request_header_new_stamps_time_and_leaves_handle() {
        let header = RequestHeader::new(NodeId::numeric(0, 5), 1_500);
        assert_eq!(header.authentication_token, NodeId::numeric(0, 5));
        assert_eq!(header.timeout_hint, 1_500);
        assert_eq!(header.request_handle, 0);
        assert!(header.timestamp > 0);
    }

    #[test]
    fn test_header_mut_rewrites_handle() {
        let mut request = close_request(1);
        request.header_mut().request_handle = 99;
        assert_eq!(request.header().request_handle, 99);
        assert_eq!(request.name(), "CloseSession");
    }

    #[test]
    fn test_fault_reports_service_fault_and_bad_headers() {
        let fault = ServiceResponse::ServiceFault(ServiceFault {
            response_header: ResponseHeader {
                service_result: StatusCode::BAD_SESSION_ID_INVALID,
                ..Default::default()
            },
        });
        assert_eq!(fault.fault(), Some(StatusCode::BAD_SESSION_ID_INVALID));

        let bad_close = ServiceResponse::CloseSession(CloseSessionResponse {
            response_header: ResponseHeader {
                service_result: StatusCode::BAD_TIMEOUT,
                ..Default::default()
            },
        });
        assert_eq!(bad_close.fault(), Some(StatusCode::BAD_TIMEOUT));

        let good_close = ServiceResponse::CloseSession(CloseSessionResponse {
            response_header: ResponseHeader::good(4),
        });
        assert_eq!(good_close.fault(), None);
    }
}
