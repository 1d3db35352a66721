//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding, decoding, sealing or opening
/// protocol payloads
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Envelope could not be opened with the given token
    #[error("Decryption failed - invalid ciphertext or wrong session token")]
    DecryptFailed,

    /// Encryption failed (only possible with a malformed key)
    #[error("Encryption failed")]
    EncryptFailed,

    /// Authorization header is not a `Bearer sid-<n>` credential
    #[error("Invalid bearer credential: {0}")]
    InvalidBearer(String),

    /// Public key bytes are malformed
    #[error("Invalid public key")]
    InvalidKey,

    /// Signature is malformed or does not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// Base64 decoding error
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Hex decoding error
    #[error("Invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
