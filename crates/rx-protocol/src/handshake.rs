//! Session handshake cryptography
//!
//! Uses:
//! - Ed25519 for identity signatures (client and server key pairs)
//! - X25519 for an ephemeral key exchange per handshake
//! - ChaCha20-Poly1305 (via [`envelope::seal`]) to deliver the session token
//!
//! The client signs `"rx-session-v1" || public_key || ephemeral_public ||
//! timestamp_be`. The server replies with its own ephemeral key, the session
//! token sealed under the shared secret, and a signature over
//! `"rx-session-v1-reply" || session_id_be || ephemeral_public || sealed_token`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, SharedSecret};

use crate::envelope::{self, SessionToken, TOKEN_LEN};
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{TokenRequest, TokenResponse};
use crate::session::SessionId;

const CLIENT_CONTEXT: &[u8] = b"rx-session-v1";
const SERVER_CONTEXT: &[u8] = b"rx-session-v1-reply";
const SEAL_CONTEXT: &[u8] = b"rx-token-seal";

/// Render a verifying key as lowercase hex
pub fn public_key_to_hex(key: &VerifyingKey) -> String {
    hex::encode(key.to_bytes())
}

/// Parse a hex-encoded Ed25519 verifying key
pub fn parse_public_key_hex(text: &str) -> ProtocolResult<VerifyingKey> {
    let bytes = hex::decode(text.trim())?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| ProtocolError::InvalidKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| ProtocolError::InvalidKey)
}

fn parse_x25519_public(text: &str) -> ProtocolResult<X25519Public> {
    let bytes = BASE64.decode(text)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| ProtocolError::InvalidKey)?;
    Ok(X25519Public::from(arr))
}

fn parse_signature(text: &str) -> ProtocolResult<Signature> {
    let bytes = BASE64.decode(text)?;
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| ProtocolError::InvalidSignature)?;
    Ok(Signature::from_bytes(&arr))
}

/// Build the message a client signs
pub fn client_message(public_key: &[u8; 32], ephemeral_public: &[u8; 32], timestamp: u64) -> Vec<u8> {
    let mut message = Vec::with_capacity(CLIENT_CONTEXT.len() + 72);
    message.extend_from_slice(CLIENT_CONTEXT);
    message.extend_from_slice(public_key);
    message.extend_from_slice(ephemeral_public);
    message.extend_from_slice(&timestamp.to_be_bytes());
    message
}

/// Build the message a server signs
pub fn server_message(session_id: u32, ephemeral_public: &[u8; 32], sealed_token: &str) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(SERVER_CONTEXT.len() + 36 + sealed_token.len());
    message.extend_from_slice(SERVER_CONTEXT);
    message.extend_from_slice(&session_id.to_be_bytes());
    message.extend_from_slice(ephemeral_public);
    message.extend_from_slice(sealed_token.as_bytes());
    message
}

/// Derive the token sealing key from the X25519 shared secret
fn seal_key(shared: &SharedSecret) -> [u8; TOKEN_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(SEAL_CONTEXT);
    hasher.update(shared.as_bytes());
    hasher.finalize().into()
}

/// Client side of the handshake.
///
/// Holds the ephemeral X25519 secret between sending the request and
/// reading the response.
pub struct ClientHandshake {
    secret: EphemeralSecret,
    public: X25519Public,
}

impl ClientHandshake {
    /// Start a new handshake with a fresh ephemeral key
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        Self { secret, public }
    }

    /// Build the signed request
    pub fn request(&self, signing_key: &SigningKey, timestamp: u64) -> TokenRequest {
        let public_key = signing_key.verifying_key().to_bytes();
        let message = client_message(&public_key, self.public.as_bytes(), timestamp);
        let signature = signing_key.sign(&message);

        TokenRequest {
            public_key: hex::encode(public_key),
            ephemeral_public: BASE64.encode(self.public.as_bytes()),
            timestamp,
            signature: BASE64.encode(signature.to_bytes()),
        }
    }

    /// Verify the server reply and recover the session token.
    ///
    /// When `pinned_server_key` is set, the reply must come from that key.
    pub fn finish(
        self,
        response: &TokenResponse,
        pinned_server_key: Option<&VerifyingKey>,
    ) -> ProtocolResult<(SessionId, SessionToken, VerifyingKey)> {
        let server_key = parse_public_key_hex(&response.server_public_key)?;
        if let Some(pinned) = pinned_server_key {
            if pinned != &server_key {
                return Err(ProtocolError::InvalidKey);
            }
        }

        let server_ephemeral = parse_x25519_public(&response.ephemeral_public)?;
        let signature = parse_signature(&response.signature)?;
        let message = server_message(
            response.session_id,
            server_ephemeral.as_bytes(),
            &response.sealed_token,
        );
        server_key
            .verify_strict(&message, &signature)
            .map_err(|_| ProtocolError::InvalidSignature)?;

        let shared = self.secret.diffie_hellman(&server_ephemeral);
        let token_bytes = envelope::open(&seal_key(&shared), &response.sealed_token)?;
        let token = SessionToken::from_slice(&token_bytes)?;

        let session_id = SessionId::new(response.session_id);
        if session_id.as_u32() == 0 {
            return Err(ProtocolError::InvalidBearer(session_id.to_string()));
        }
        Ok((session_id, token, server_key))
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// A token request whose signature has been checked
#[derive(Debug)]
pub struct VerifiedRequest {
    /// Identity that signed the request
    pub identity: VerifyingKey,
    /// Client ephemeral key for sealing the token
    pub ephemeral_public: X25519Public,
    /// Timestamp the client signed
    pub timestamp: u64,
}

/// Parse a token request and verify its signature.
///
/// Trust and freshness checks are left to the caller.
pub fn verify_request(request: &TokenRequest) -> ProtocolResult<VerifiedRequest> {
    let identity = parse_public_key_hex(&request.public_key)?;
    let ephemeral_public = parse_x25519_public(&request.ephemeral_public)?;
    let signature = parse_signature(&request.signature)?;

    let message = client_message(
        &identity.to_bytes(),
        ephemeral_public.as_bytes(),
        request.timestamp,
    );
    identity
        .verify_strict(&message, &signature)
        .map_err(|_| ProtocolError::InvalidSignature)?;

    Ok(VerifiedRequest {
        identity,
        ephemeral_public,
        timestamp: request.timestamp,
    })
}

/// Seal a session token for the requesting client and sign the reply
pub fn build_response(
    server_key: &SigningKey,
    session_id: SessionId,
    client_ephemeral: &X25519Public,
    token: &SessionToken,
) -> ProtocolResult<TokenResponse> {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    let shared = secret.diffie_hellman(client_ephemeral);

    let sealed_token = envelope::seal(&seal_key(&shared), token.as_bytes())?;
    let message = server_message(session_id.as_u32(), public.as_bytes(), &sealed_token);
    let signature = server_key.sign(&message);

    Ok(TokenResponse {
        session_id: session_id.as_u32(),
        server_public_key: public_key_to_hex(&server_key.verifying_key()),
        ephemeral_public: BASE64.encode(public.as_bytes()),
        sealed_token,
        signature: BASE64.encode(signature.to_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> (SigningKey, SigningKey) {
        (SigningKey::generate(&mut OsRng), SigningKey::generate(&mut OsRng))
    }

    #[test]
    fn test_handshake_flow() {
        let (client_key, server_key) = keys();
        let handshake = ClientHandshake::new();
        let request = handshake.request(&client_key, 1_700_000_000);

        let verified = verify_request(&request).unwrap();
        assert_eq!(verified.identity, client_key.verifying_key());
        assert_eq!(verified.timestamp, 1_700_000_000);

        let token = SessionToken::generate();
        let response =
            build_response(&server_key, SessionId::new(5), &verified.ephemeral_public, &token)
                .unwrap();

        let (id, recovered, server_public) = handshake.finish(&response, None).unwrap();
        assert_eq!(id, SessionId::new(5));
        assert_eq!(recovered, token);
        assert_eq!(server_public, server_key.verifying_key());
    }

    #[test]
    fn test_request_signed_by_other_key_fails() {
        let (client_key, impostor) = keys();
        let handshake = ClientHandshake::new();
        let mut request = handshake.request(&impostor, 10);
        request.public_key = public_key_to_hex(&client_key.verifying_key());

        assert!(matches!(
            verify_request(&request),
            Err(ProtocolError::InvalidSignature)
        ));
    }

    #[test]
    fn test_request_with_altered_timestamp_fails() {
        let (client_key, _) = keys();
        let mut request = ClientHandshake::new().request(&client_key, 10);
        request.timestamp = 11;
        assert!(verify_request(&request).is_err());
    }

    #[test]
    fn test_pinned_server_key_mismatch() {
        let (client_key, server_key) = keys();
        let (other, _) = keys();
        let handshake = ClientHandshake::new();
        let verified = verify_request(&handshake.request(&client_key, 1)).unwrap();
        let response = build_response(
            &server_key,
            SessionId::new(1),
            &verified.ephemeral_public,
            &SessionToken::generate(),
        )
        .unwrap();

        let pinned = other.verifying_key();
        assert!(matches!(
            handshake.finish(&response, Some(&pinned)),
            Err(ProtocolError::InvalidKey)
        ));
    }

    #[test]
    fn test_tampered_response_fails() {
        let (client_key, server_key) = keys();
        let handshake = ClientHandshake::new();
        let verified = verify_request(&handshake.request(&client_key, 1)).unwrap();
        let mut response = build_response(
            &server_key,
            SessionId::new(1),
            &verified.ephemeral_public,
            &SessionToken::generate(),
        )
        .unwrap();
        response.session_id = 2;

        assert!(matches!(
            handshake.finish(&response, None),
            Err(ProtocolError::InvalidSignature)
        ));
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let (key, _) = keys();
        let text = public_key_to_hex(&key.verifying_key());
        assert_eq!(text.len(), 64);
        assert_eq!(parse_public_key_hex(&text).unwrap(), key.verifying_key());
        assert!(parse_public_key_hex("abcd").is_err());
        assert!(parse_public_key_hex("zz").is_err());
    }
}
