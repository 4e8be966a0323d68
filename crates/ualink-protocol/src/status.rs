//! OPC UA status codes.
//!
//! A status code is a 32-bit value. The two top bits carry the severity
//! (`00` good, `01` uncertain, `10` bad) and the next 14 bits the code
//! itself. Only the codes the client stack inspects are named here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-bit OPC UA status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: StatusCode = StatusCode(0x0000_0000);
    pub const UNCERTAIN: StatusCode = StatusCode(0x4000_0000);
    pub const BAD: StatusCode = StatusCode(0x8000_0000);

    pub const BAD_UNEXPECTED_ERROR: StatusCode = StatusCode(0x8001_0000);
    pub const BAD_INTERNAL_ERROR: StatusCode = StatusCode(0x8002_0000);
    pub const BAD_COMMUNICATION_ERROR: StatusCode = StatusCode(0x8005_0000);
    pub const BAD_DECODING_ERROR: StatusCode = StatusCode(0x8007_0000);
    pub const BAD_TIMEOUT: StatusCode = StatusCode(0x800A_0000);
    pub const BAD_SERVICE_UNSUPPORTED: StatusCode = StatusCode(0x800B_0000);
    pub const BAD_SHUTDOWN: StatusCode = StatusCode(0x800C_0000);
    pub const BAD_SERVER_NOT_CONNECTED: StatusCode = StatusCode(0x800D_0000);
    pub const BAD_NOTHING_TO_DO: StatusCode = StatusCode(0x800F_0000);
    pub const BAD_SECURITY_CHECKS_FAILED: StatusCode = StatusCode(0x8013_0000);
    pub const BAD_IDENTITY_TOKEN_INVALID: StatusCode = StatusCode(0x8020_0000);
    pub const BAD_IDENTITY_TOKEN_REJECTED: StatusCode = StatusCode(0x8021_0000);
    pub const BAD_SESSION_ID_INVALID: StatusCode = StatusCode(0x8025_0000);
    pub const BAD_SESSION_CLOSED: StatusCode = StatusCode(0x8026_0000);
    pub const BAD_SESSION_NOT_ACTIVATED: StatusCode = StatusCode(0x8027_0000);
    pub const BAD_SUBSCRIPTION_ID_INVALID: StatusCode = StatusCode(0x8028_0000);
    pub const BAD_NODE_ID_UNKNOWN: StatusCode = StatusCode(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: StatusCode = StatusCode(0x8035_0000);
    pub const BAD_NOT_WRITABLE: StatusCode = StatusCode(0x803B_0000);
    pub const BAD_CONNECTION_CLOSED: StatusCode = StatusCode(0x80AE_0000);

    const SEVERITY_MASK: u32 = 0xC000_0000;

    /// Returns `true` when the severity bits say "good".
    pub fn is_good(self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0
    }

    /// Returns `true` when the severity bits say "uncertain".
    pub fn is_uncertain(self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0x4000_0000
    }

    /// Returns `true` when the severity bits say "bad".
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns `true` for the codes meaning the server no longer
    /// recognises the session: id invalid, closed, not activated, or a
    /// failed security check. A session reporting one of these cannot be
    /// reactivated and has to be created again.
    pub fn is_session_invalid(self) -> bool {
        matches!(
            self,
            Self::BAD_SESSION_ID_INVALID
                | Self::BAD_SESSION_CLOSED
                | Self::BAD_SESSION_NOT_ACTIVATED
                | Self::BAD_SECURITY_CHECKS_FAILED
        )
    }

    /// Symbolic name for the codes named in this module.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::GOOD => "Good",
            Self::UNCERTAIN => "Uncertain",
            Self::BAD => "Bad",
            Self::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            Self::BAD_INTERNAL_ERROR => "BadInternalError",
            Self::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            Self::BAD_DECODING_ERROR => "BadDecodingError",
            Self::BAD_TIMEOUT => "BadTimeout",
            Self::BAD_SERVICE_UNSUPPORTED => "BadServiceUnsupported",
            Self::BAD_SHUTDOWN => "BadShutdown",
            Self::BAD_SERVER_NOT_CONNECTED => "BadServerNotConnected",
            Self::BAD_NOTHING_TO_DO => "BadNothingToDo",
            Self::BAD_SECURITY_CHECKS_FAILED => "BadSecurityChecksFailed",
            Self::BAD_IDENTITY_TOKEN_INVALID => "BadIdentityTokenInvalid",
            Self::BAD_IDENTITY_TOKEN_REJECTED => "BadIdentityTokenRejected",
            Self::BAD_SESSION_ID_INVALID => "BadSessionIdInvalid",
            Self::BAD_SESSION_CLOSED => "BadSessionClosed",
            Self::BAD_SESSION_NOT_ACTIVATED => "BadSessionNotActivated",
            Self::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_ATTRIBUTE_ID_INVALID => "BadAttributeIdInvalid",
            Self::BAD_NOT_WRITABLE => "BadNotWritable",
            Self::BAD_CONNECTION_CLOSED => "BadConnectionClosed",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bits() {
        assert!(StatusCode::GOOD.is_good());
        assert!(StatusCode::UNCERTAIN.is_uncertain());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert!(!StatusCode::BAD_TIMEOUT.is_good());
        assert!(!StatusCode::GOOD.is_bad());
    }

    #[test]
    fn test_is_session_invalid_matches_exactly_four_codes() {
        assert!(StatusCode::BAD_SESSION_ID_INVALID.is_session_invalid());
        assert!(StatusCode::BAD_SESSION_CLOSED.is_session_invalid());
        assert!(StatusCode::BAD_SESSION_NOT_ACTIVATED.is_session_invalid());
        assert!(StatusCode::BAD_SECURITY_CHECKS_FAILED.is_session_invalid());

        assert!(!StatusCode::BAD_TIMEOUT.is_session_invalid());
        assert!(!StatusCode::BAD_COMMUNICATION_ERROR.is_session_invalid());
        assert!(!StatusCode::BAD.is_session_invalid());
        assert!(!StatusCode::GOOD.is_session_invalid());
    }

    #[test]
    fn test_display_named_and_unnamed() {
        assert_eq!(
            StatusCode::BAD_SESSION_CLOSED.to_string(),
            "BadSessionClosed (0x80260000)"
        );
        assert_eq!(StatusCode(0x8123_0000).to_string(), "0x81230000");
    }
}
