//! Client error types

use thiserror::Error;

use rx_core::{KeyError, TransferError};
use rx_protocol::{ErrorResponse, ProtocolError};

/// Errors returned by the client library
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Handshake or envelope failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Exec response did not carry a process id
    #[error("Response is missing the process id header")]
    MissingProcessId,

    /// Archive could not be packed or unpacked locally
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Key file error
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True for 401 responses
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Server { status: 401, .. })
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Turn a non-success response into [`ClientError::Server`]
pub(crate) async fn check_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.error)
        .unwrap_or(text);
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}
