use std::fmt::{Debug, Formatter};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
#[cfg(test)] use mockall::automock;
use serde::Deserialize;

/// length of the symmetric session key in bytes
pub const AES_KEY_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("malformed authentication response: {0}")]
    Format(#[from] serde_json::Error),
    #[error("authentication response has status 'true' but no session key")]
    MissingKey,
    #[error("session key is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cryptography error: {0}")]
    Crypto(String),
}

/// Decrypts a session key that was encrypted with this node's public key. The asymmetric
///  cryptography lives outside of this crate.
#[cfg_attr(test, automock)]
pub trait KeyDecryptor: Send + Sync {
    fn decrypt(&self, encrypted_key: &[u8]) -> anyhow::Result<Vec<u8>>;
}

#[derive(Clone, Eq, PartialEq)]
pub struct SecretKey(pub [u8; AES_KEY_BYTES]);

impl Debug for SecretKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

#[derive(Deserialize)]
struct RawAuthResponse {
    status: bool,
    #[serde(rename = "AES128")]
    aes128: Option<String>,
    message: String,
}

/// A peer's answer to an authentication request. A successful answer carries the session key,
///  encrypted with this node's public key.
#[derive(Debug)]
pub struct AuthResponse {
    status: bool,
    encrypted_key: Option<Vec<u8>>,
    message: String,
}

impl AuthResponse {
    pub fn parse(text: &str) -> Result<AuthResponse, AuthError> {
        let raw: RawAuthResponse = serde_json::from_str(text)?;

        let encrypted_key = if raw.status {
            let encoded = raw.aes128.ok_or(AuthError::MissingKey)?;
            Some(STANDARD.decode(encoded)?)
        }
        else {
            None
        };

        Ok(AuthResponse {
            status: raw.status,
            encrypted_key,
            message: raw.message,
        })
    }

    /// Decrypts the session key, truncating the decrypted bytes to the AES key length. Returns
    ///  `None` for a response without a key.
    pub fn decrypt_key(&self, decryptor: &dyn KeyDecryptor) -> Result<Option<SecretKey>, AuthError> {
        let Some(encrypted_key) = &self.encrypted_key else {
            return Ok(None);
        };

        let decrypted = decryptor.decrypt(encrypted_key)
            .map_err(|e| AuthError::Crypto(e.to_string()))?;

        let key_bytes = decrypted.get(..AES_KEY_BYTES)
            .ok_or_else(|| AuthError::Crypto(format!("decrypted key has {} bytes, expected at least {}", decrypted.len(), AES_KEY_BYTES)))?;

        let mut key = [0u8; AES_KEY_BYTES];
        key.copy_from_slice(key_bytes);
        Ok(Some(SecretKey(key)))
    }

    pub fn is_error(&self) -> bool {
        !self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
