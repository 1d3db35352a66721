//! HTTP error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use rx_core::TransferError;
use rx_protocol::{ErrorResponse, ProtocolError};

use crate::auth::AuthError;
use crate::executor::ExecError;

/// Errors returned by request handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Decryption failed")]
    DecryptFailed,

    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    #[error("{0}")]
    SpawnFailed(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::DecryptFailed => StatusCode::BAD_REQUEST,
            ApiError::UnknownExecutor(_) => StatusCode::BAD_REQUEST,
            ApiError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::DecryptFailed => ApiError::DecryptFailed,
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::UnknownExecutor(name) => ApiError::UnknownExecutor(name),
            ExecError::InvalidCommand(reason) => ApiError::BadRequest(reason),
            other => ApiError::SpawnFailed(other.to_string()),
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::NotADirectory(path) => ApiError::NotFound(path.display().to_string()),
            TransferError::TraversalRejected(path) => {
                ApiError::BadRequest(format!("path escapes base: {}", path.display()))
            }
            TransferError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Unauthorized(reason) => tracing::warn!("Unauthorized request: {}", reason),
            ApiError::SpawnFailed(_) | ApiError::Internal(_) => tracing::error!("{}", self),
            _ => tracing::debug!("Request failed: {}", self),
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let resp = ApiError::Unauthorized(AuthError::MissingCredential).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = ApiError::from(ProtocolError::DecryptFailed).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(ExecError::UnknownExecutor("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = ApiError::from(ExecError::NoPid).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = ApiError::from(TransferError::NotADirectory("/x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
