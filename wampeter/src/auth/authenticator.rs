use anyhow::Result;
use async_trait::async_trait;

use crate::core::{
    error::AuthenticationError,
    types::Dictionary,
    uri::Uri,
};

/// A response to an authentication challenge, transmitted in an AUTHENTICATE message.
#[derive(Debug, Default, Clone)]
pub struct AuthenticationResponse {
    /// The computed signature.
    pub signature: String,
    /// Additional data for the router.
    pub extra: Dictionary,
}

/// Client-side authenticator, used to answer challenges issued by the router during session
/// establishment.
#[async_trait]
pub trait ClientAuthenticator: Send + Sync {
    /// The authentication ID (a.k.a., `authid`) announced in HELLO, if any.
    fn authentication_id(&self) -> Option<String>;

    /// The authentication methods the client can answer, in order of preference.
    fn authentication_methods(&self) -> Vec<String>;

    /// Produces a response to a challenge.
    ///
    /// Failures are reported to the router in an ABORT message, so implementations should fail
    /// with [`AuthenticationError`] to control the transmitted reason and details.
    async fn authenticate(
        &self,
        auth_method: &str,
        extra: &Dictionary,
    ) -> Result<AuthenticationResponse>;
}

/// Authenticator for sessions that do not expect to be challenged.
///
/// Announces no identity and no methods, and fails every challenge.
#[derive(Debug, Default)]
pub struct DefaultClientAuthenticator {}

#[async_trait]
impl ClientAuthenticator for DefaultClientAuthenticator {
    fn authentication_id(&self) -> Option<String> {
        None
    }

    fn authentication_methods(&self) -> Vec<String> {
        Vec::new()
    }

    async fn authenticate(
        &self,
        auth_method: &str,
        _: &Dictionary,
    ) -> Result<AuthenticationResponse> {
        Err(AuthenticationError::new(
            Uri::from_known("wamp.error.cannot_authenticate"),
            format!("no authenticator available for method {auth_method}"),
        )
        .into())
    }
}
