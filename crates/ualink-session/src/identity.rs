//! Identity providers: who the client claims to be when activating.
//!
//! The state machine asks an [`IdentityProvider`] for a token every time
//! it activates or reactivates a session, passing the endpoint (to pick a
//! token policy) and the current server nonce (for providers that sign or
//! encrypt against it).

use std::fmt;

use ualink_protocol::{
    ByteString, EndpointDescription, SecurityPolicy, SignatureData, UserIdentityToken,
    UserTokenType,
};

use crate::SessionError;

/// Produces the user identity token presented on activation.
///
/// Called from inside the state machine task, so implementations must not
/// block for long.
///
/// # Example
///
/// ```rust
/// use ualink_protocol::{ByteString, EndpointDescription, SignatureData, UserIdentityToken};
/// use ualink_session::{IdentityProvider, SessionError};
///
/// /// Always presents the same anonymous policy id.
/// struct FixedAnonymous(&'static str);
///
/// impl IdentityProvider for FixedAnonymous {
///     fn identity_token(
///         &self,
///         _endpoint: &EndpointDescription,
///         _server_nonce: &ByteString,
///     ) -> Result<(UserIdentityToken, SignatureData), SessionError> {
///         let token = UserIdentityToken::Anonymous { policy_id: self.0.to_string() };
///         Ok((token, SignatureData::default()))
///     }
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    /// Returns the token and its signature.
    ///
    /// # Errors
    /// [`SessionError::Identity`] if the endpoint offers no usable policy.
    fn identity_token(
        &self,
        endpoint: &EndpointDescription,
        server_nonce: &ByteString,
    ) -> Result<(UserIdentityToken, SignatureData), SessionError>;
}

/// Presents an anonymous identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousProvider;

impl IdentityProvider for AnonymousProvider {
    fn identity_token(
        &self,
        endpoint: &EndpointDescription,
        _server_nonce: &ByteString,
    ) -> Result<(UserIdentityToken, SignatureData), SessionError> {
        let policy = endpoint
            .token_policy(UserTokenType::Anonymous)
            .ok_or_else(|| SessionError::Identity("no anonymous token policy found".into()))?;

        let token = UserIdentityToken::Anonymous {
            policy_id: policy.policy_id.clone().unwrap_or_default(),
        };
        Ok((token, SignatureData::default()))
    }
}

/// Presents a user name and password.
///
/// Only plaintext tokens are produced, so the token policy (or, if it names
/// none, the endpoint) must use the `None` security policy.
#[derive(Clone)]
pub struct UsernameProvider {
    user_name: String,
    password: String,
}

impl UsernameProvider {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UsernameProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsernameProvider")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl IdentityProvider for UsernameProvider {
    fn identity_token(
        &self,
        endpoint: &EndpointDescription,
        _server_nonce: &ByteString,
    ) -> Result<(UserIdentityToken, SignatureData), SessionError> {
        let policy = endpoint
            .token_policy(UserTokenType::UserName)
            .ok_or_else(|| SessionError::Identity("no username token policy found".into()))?;

        let policy_uri = policy
            .security_policy_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(&endpoint.security_policy_uri);

        match SecurityPolicy::from_uri(policy_uri) {
            Some(SecurityPolicy::None) => {}
            Some(other) => {
                return Err(SessionError::Identity(format!(
                    "password encryption for {other:?} is not supported"
                )));
            }
            None => {
                return Err(SessionError::Identity(format!(
                    "unknown security policy: {policy_uri}"
                )));
            }
        }

        let token = UserIdentityToken::UserName {
            policy_id: policy.policy_id.clone().unwrap_or_default(),
            user_name: self.user_name.clone(),
            password: ByteString::of(self.password.as_bytes()),
            encryption_algorithm: None,
        };
        Ok((token, SignatureData::default()))
    }
}
