//! Session authentication
//!
//! A client proves its identity once, at `/token`, by signing a handshake
//! message with a trusted Ed25519 key. Later requests carry only the bearer
//! session id; the session stays valid for as long as its identity remains
//! in the live trusted key set.

use std::sync::Arc;

use thiserror::Error;

use rx_core::keys::fingerprint;
use rx_core::time::within_skew;
use rx_protocol::handshake::{build_response, verify_request};
use rx_protocol::{ProtocolError, SessionId, TokenRequest, TokenResponse};

use crate::session::Session;
use crate::state::ServerState;

/// Authentication failures
#[derive(Error, Debug)]
pub enum AuthError {
    /// Public key is not in the trusted key set
    #[error("Untrusted public key {0}")]
    UntrustedKey(String),

    /// Request timestamp is too far from the server clock
    #[error("Timestamp {0} outside allowed clock skew")]
    StaleTimestamp(u64),

    /// Malformed request or bad signature
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Authorization header missing
    #[error("Missing bearer credential")]
    MissingCredential,

    /// Session id not known to this server
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Session identity was removed from the trusted key set
    #[error("Session {0} revoked")]
    Revoked(SessionId),
}

/// Verify a token request and open a new session for it
pub fn request_new_session(
    state: &ServerState,
    request: &TokenRequest,
) -> Result<(Arc<Session>, TokenResponse), AuthError> {
    let verified = verify_request(request)?;
    let identity = fingerprint(&verified.identity);

    if !state.trust.is_trusted(&verified.identity) {
        return Err(AuthError::UntrustedKey(identity));
    }
    if !within_skew(verified.timestamp, state.config.max_clock_skew) {
        return Err(AuthError::StaleTimestamp(verified.timestamp));
    }

    let session = state.sessions.create(verified.identity);
    let response = match build_response(
        state.key_pair.signing_key(),
        session.id,
        &verified.ephemeral_public,
        &session.token,
    ) {
        Ok(response) => response,
        Err(e) => {
            state.sessions.remove(session.id);
            return Err(e.into());
        }
    };

    tracing::info!("Opened session {} for {}", session.id, identity);
    Ok((session, response))
}

/// Resolve an `Authorization` header value to a live session
pub fn authenticate(state: &ServerState, header: Option<&str>) -> Result<Arc<Session>, AuthError> {
    let header = header.ok_or(AuthError::MissingCredential)?;
    let id = SessionId::from_bearer(header)?;
    let session = state
        .sessions
        .get(id)
        .ok_or(AuthError::UnknownSession(id))?;

    if !state.trust.is_trusted(&session.identity) {
        state.sessions.remove(id);
        return Err(AuthError::Revoked(id));
    }

    session.touch();
    Ok(session)
}
