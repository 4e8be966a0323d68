//! Converting envelopes to and from bytes.
//!
//! The client stack never serializes anything itself. It is handed a
//! [`Codec`] and calls `encode`/`decode` on whole [`Envelope`]s, so the
//! wire format can change without touching the session or transport code.
//!
//! [`JsonCodec`] implements the JSON mapping, which is what the WebSocket
//! transport carries.
//!
//! [`Envelope`]: crate::Envelope

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because one codec instance is shared by the
/// request path and the background reader task of a channel.
///
/// The methods are generic over the message type, which keeps the trait
/// out of `dyn` territory; callers hold a concrete codec type parameter.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented
    /// in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or do
    /// not describe a `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] using `serde_json`.
///
/// Behind the `json` feature (on by default).
///
/// ## Example
///
/// ```rust
/// use ualink_protocol::{
///     CloseSessionRequest, Codec, JsonCodec, RequestEnvelope, RequestHeader, ServiceRequest,
/// };
///
/// let codec = JsonCodec;
///
/// let envelope = RequestEnvelope {
///     request_handle: 7,
///     body: ServiceRequest::CloseSession(CloseSessionRequest {
///         request_header: RequestHeader { request_handle: 7, ..Default::default() },
///         delete_subscriptions: true,
///     }),
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: RequestEnvelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{
        ReadResponse, ResponseEnvelope, ResponseHeader, ServiceResponse, DataValue, StatusCode,
        Variant,
    };

    #[test]
    fn test_json_codec_envelope_shape() {
        let envelope = ResponseEnvelope {
            request_handle: 12,
            body: ServiceResponse::Read(ReadResponse {
                response_header: ResponseHeader::good(12),
                results: vec![DataValue::new(Variant::Int32(42))],
            }),
        };

        let bytes = JsonCodec.encode(&envelope).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["request_handle"], 12);
        assert_eq!(json["body"]["type"], "Read");
        assert_eq!(json["body"]["results"][0]["value"]["type"], "Int32");
        assert_eq!(json["body"]["results"][0]["value"]["value"], 42);
    }

    #[test]
    fn test_json_codec_decode_service_fault() {
        let raw = br#"{
            "request_handle": 3,
            "body": {
                "type": "ServiceFault",
                "response_header": {
                    "timestamp": 0,
                    "request_handle": 3,
                    "service_result": 2149908480
                }
            }
        }"#;
        let envelope: ResponseEnvelope = JsonCodec.decode(raw).unwrap();
        assert_eq!(envelope.request_handle, 3);
        assert_eq!(envelope.body.fault(), Some(StatusCode::BAD_SESSION_ID_INVALID));
    }

    #[test]
    fn test_json_codec_decode_garbage_returns_error() {
        let result: Result<ResponseEnvelope, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
