use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use healthchain_protocol::ProtocolError;
use thiserror::Error;

use crate::blob::BlobError;
use crate::signing::SigningError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {0}: {1}")]
    Invalid(&'static str, String),
}

/// Every failure a handler can surface. Rendered as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("upload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected ({}): {}", status, self);
        }
        // Internal details stay in the log.
        let message = match &self {
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::AlreadyDecided(_) | ProtocolError::NotResendable(_) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::AlreadyExists(path) => {
                ApiError::Conflict(format!("object already exists: {}", path))
            }
            BlobError::NotFound(path) => ApiError::NotFound(format!("object not found: {}", path)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::Expired => ApiError::BadRequest("signed URL has expired".to_string()),
            SigningError::Invalid | SigningError::WrongObject => {
                ApiError::Forbidden("invalid signature".to_string())
            }
            SigningError::Encode(e) => ApiError::Internal(e),
        }
    }
}
