//! Encrypted request envelope
//!
//! Payloads are JSON encoded and sealed with ChaCha20-Poly1305 under the
//! session token. The sealed form is `base64(nonce || ciphertext)`; a fresh
//! random nonce is drawn for every message. The envelope carries no session
//! id, that travels in the `Authorization` header.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, ProtocolResult};

/// Length of a session token in bytes
pub const TOKEN_LEN: usize = 32;

/// Length of a ChaCha20-Poly1305 nonce in bytes
const NONCE_LEN: usize = 12;

/// Symmetric key material bound to one session
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken([u8; TOKEN_LEN]);

impl SessionToken {
    /// Draw a fresh token from the OS random source
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw token bytes
    pub fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, failing if the length is wrong
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        let arr: [u8; TOKEN_LEN] = bytes.try_into().map_err(|_| ProtocolError::DecryptFailed)?;
        Ok(Self(arr))
    }

    /// Raw token bytes
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Wire container for an encrypted JSON payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// `base64(nonce || ciphertext)`
    pub encrypted_json: String,
}

/// Seal bytes under a 32-byte key
pub fn seal(key: &[u8; TOKEN_LEN], plaintext: &[u8]) -> ProtocolResult<String> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| ProtocolError::EncryptFailed)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(sealed))
}

/// Open a value produced by [`seal`]
pub fn open(key: &[u8; TOKEN_LEN], sealed: &str) -> ProtocolResult<Vec<u8>> {
    let raw = BASE64
        .decode(sealed)
        .map_err(|_| ProtocolError::DecryptFailed)?;
    if raw.len() <= NONCE_LEN {
        return Err(ProtocolError::DecryptFailed);
    }
    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);

    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::DecryptFailed)
}

/// Serialize `payload` to JSON and encrypt it under the session token
pub fn wrap<T: Serialize>(token: &SessionToken, payload: &T) -> ProtocolResult<EncryptedEnvelope> {
    let json = serde_json::to_vec(payload)?;
    Ok(EncryptedEnvelope {
        encrypted_json: seal(token.as_bytes(), &json)?,
    })
}

/// Decrypt an envelope and deserialize the JSON payload
pub fn unwrap<T: DeserializeOwned>(
    token: &SessionToken,
    envelope: &EncryptedEnvelope,
) -> ProtocolResult<T> {
    let json = open(token.as_bytes(), &envelope.encrypted_json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ExecRequest;

    #[test]
    fn test_wrap_unwrap() {
        let token = SessionToken::generate();
        let request = ExecRequest::new("exec", "echo", vec!["hello".to_string()]);

        let envelope = wrap(&token, &request).unwrap();
        assert!(!envelope.encrypted_json.contains("echo"));

        let opened: ExecRequest = unwrap(&token, &envelope).unwrap();
        assert_eq!(opened, request);
    }

    #[test]
    fn test_unwrap_with_other_token_fails() {
        let token = SessionToken::generate();
        let other = SessionToken::generate();
        let envelope = wrap(&token, &"payload").unwrap();

        let result: ProtocolResult<String> = unwrap(&other, &envelope);
        assert!(matches!(result, Err(ProtocolError::DecryptFailed)));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let token = SessionToken::generate();
        let envelope = wrap(&token, &42u32).unwrap();

        let mut raw = BASE64.decode(&envelope.encrypted_json).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = EncryptedEnvelope {
            encrypted_json: BASE64.encode(raw),
        };

        let result: ProtocolResult<u32> = unwrap(&token, &tampered);
        assert!(matches!(result, Err(ProtocolError::DecryptFailed)));
    }

    #[test]
    fn test_garbage_envelope_fails() {
        let token = SessionToken::generate();
        for garbage in ["", "!!!not base64!!!", "AAAA"] {
            let envelope = EncryptedEnvelope {
                encrypted_json: garbage.to_string(),
            };
            let result: ProtocolResult<u32> = unwrap(&token, &envelope);
            assert!(matches!(result, Err(ProtocolError::DecryptFailed)));
        }
    }

    #[test]
    fn test_nonce_is_fresh() {
        let token = SessionToken::generate();
        let a = wrap(&token, &"same").unwrap();
        let b = wrap(&token, &"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_debug_hides_bytes() {
        let token = SessionToken::from_bytes([7u8; TOKEN_LEN]);
        assert_eq!(format!("{:?}", token), "SessionToken(..)");
    }
}
