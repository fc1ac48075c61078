use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use photovault_media::MediaError;
use photovault_shared::PhotoId;
use photovault_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(String),

    #[error("Username already taken")]
    UsernameTaken,

    #[error("No such user")]
    UserNotFound,

    #[error("Wrong password")]
    InvalidPassword,

    /// Missing, malformed, expired or forged token.  Carries no detail.
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("Photo {0} has no file on disk")]
    FileMissing(PhotoId),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("Conversion failed for {name}: {reason}")]
    ConversionFailed { name: String, reason: String },

    #[error("Upload too large")]
    PayloadTooLarge,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable kind, so the boundary can branch on it.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Validation(_) => "validation",
            ServerError::UsernameTaken => "username_taken",
            ServerError::UserNotFound => "user_not_found",
            ServerError::InvalidPassword => "invalid_password",
            ServerError::Unauthorized => "unauthorized",
            ServerError::PhotoNotFound(_) => "not_found",
            ServerError::FileMissing(_) => "file_missing",
            ServerError::UnsupportedType(_) => "unsupported_type",
            ServerError::ConversionFailed { .. } => "conversion_failed",
            ServerError::PayloadTooLarge => "payload_too_large",
            ServerError::Store(_)
            | ServerError::Media(_)
            | ServerError::Io(_)
            | ServerError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::UsernameTaken => StatusCode::CONFLICT,
            ServerError::UserNotFound
            | ServerError::InvalidPassword
            | ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::PhotoNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::FileMissing(_) => StatusCode::GONE,
            ServerError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServerError::ConversionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Store(_)
            | ServerError::Media(_)
            | ServerError::Io(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Store(_) | ServerError::Io(_) => "Storage error".to_string(),
            ServerError::Media(_) | ServerError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
