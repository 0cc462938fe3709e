use anyhow::Result;
use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use hmac::{
    Hmac,
    Mac,
};
use sha2::Sha256;

use crate::{
    auth::authenticator::{
        AuthenticationResponse,
        ClientAuthenticator as ClientAuthenticatorInterface,
    },
    core::{
        error::AuthenticationError,
        types::{
            Dictionary,
            Value,
        },
        uri::Uri,
    },
};

/// The name of the WAMP-CRA authentication method.
pub const AUTH_METHOD: &str = "wampcra";

const DEFAULT_ITERATIONS: u32 = 1000;
const DEFAULT_KEY_LENGTH: usize = 32;

fn cannot_authenticate<S>(message: S) -> AuthenticationError
where
    S: Into<String>,
{
    AuthenticationError::new(Uri::from_known("wamp.error.cannot_authenticate"), message)
}

/// Client authenticator for WAMP Challenge-Response Authentication.
///
/// The router transmits a challenge string, which the client signs with a shared secret
/// (HMAC-SHA256, base64 output). If the challenge extra carries a `salt`, the signing key is
/// instead the base64 of a PBKDF2-derived key, so the router never needs the plain secret.
pub struct ClientAuthenticator {
    authentication_id: String,
    secret: String,
}

impl ClientAuthenticator {
    /// Creates a new client authenticator for the user with the given secret.
    pub fn new(authentication_id: String, secret: String) -> Self {
        Self {
            authentication_id,
            secret,
        }
    }

    fn signing_key(&self, extra: &Dictionary) -> Vec<u8> {
        let salt = match extra.get("salt") {
            Some(Value::String(salt)) if !salt.is_empty() => salt,
            _ => return self.secret.clone().into_bytes(),
        };
        let iterations = extra
            .get("iterations")
            .and_then(|value| value.integer())
            .map(|iterations| iterations as u32)
            .unwrap_or(DEFAULT_ITERATIONS);
        let key_length = extra
            .get("keylen")
            .and_then(|value| value.integer())
            .map(|key_length| key_length as usize)
            .unwrap_or(DEFAULT_KEY_LENGTH);
        let mut derived = vec![0; key_length];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.secret.as_bytes(),
            salt.as_bytes(),
            iterations,
            &mut derived,
        );
        STANDARD.encode(derived).into_bytes()
    }
}

#[async_trait::async_trait]
impl ClientAuthenticatorInterface for ClientAuthenticator {
    fn authentication_id(&self) -> Option<String> {
        Some(self.authentication_id.clone())
    }

    fn authentication_methods(&self) -> Vec<String> {
        Vec::from_iter([AUTH_METHOD.to_owned()])
    }

    async fn authenticate(
        &self,
        auth_method: &str,
        extra: &Dictionary,
    ) -> Result<AuthenticationResponse> {
        if auth_method != AUTH_METHOD {
            return Err(cannot_authenticate(format!(
                "unsupported authentication method: {auth_method}"
            ))
            .into());
        }
        let challenge = match extra.get("challenge") {
            Some(Value::String(challenge)) => challenge,
            _ => return Err(cannot_authenticate("challenge string missing from extra").into()),
        };
        let key = self.signing_key(extra);
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|_| cannot_authenticate("invalid signing key"))?;
        mac.update(challenge.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(AuthenticationResponse {
            signature,
            extra: Dictionary::default(),
        })
    }
}
