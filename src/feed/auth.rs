//! Private feed credentials and challenge signing
//!
//! The hub authenticates with a challenge: `GetAuthContext(key)` returns a
//! string which the client signs with HMAC-SHA512 keyed by the API secret,
//! then sends back hex-encoded through `Authenticate(key, signature)`.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::fmt;

type HmacSha512 = Hmac<Sha512>;

/// Step of the private feed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// `GetAuthContext`
    Challenge,
    /// Signing the challenge locally
    Sign,
    /// `Authenticate`
    Authenticate,
}

impl AuthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStage::Challenge => "challenge",
            AuthStage::Sign => "sign",
            AuthStage::Authenticate => "authenticate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// API key and secret for the private order/balance feed
#[derive(Clone)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// `None` when either part is blank
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let secret = secret.into();
        if key.trim().is_empty() || secret.trim().is_empty() {
            return None;
        }
        Some(Self { key, secret })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lowercase hex HMAC-SHA512 of `challenge`
    pub fn sign(&self, challenge: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        mac.update(challenge.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
