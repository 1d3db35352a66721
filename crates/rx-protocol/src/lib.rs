//! rx-protocol: Wire protocol for remexec
//!
//! This crate defines the messages exchanged between the client and the
//! server, the bearer session credential, the encrypted request envelope and
//! the signed handshake used to establish a session.

pub mod envelope;
pub mod error;
pub mod handshake;
pub mod message;
pub mod session;

pub use envelope::{EncryptedEnvelope, SessionToken};
pub use error::{ProtocolError, ProtocolResult};
pub use handshake::{parse_public_key_hex, public_key_to_hex, ClientHandshake};
pub use message::{
    encode_output_line, BodyLine, DownloadQuery, ErrorResponse, ExecRequest, ExitStatus,
    KillRequest, KillResponse, TokenRequest, TokenResponse, UploadAck, BASE_PATH_HEADER,
    EXIT_TRAILER_PREFIX, MAX_LINE_BYTES, PROCESS_ID_HEADER,
};
pub use session::SessionId;

// Key types are part of the public API of the handshake.
pub use ed25519_dalek::{SigningKey, VerifyingKey};
