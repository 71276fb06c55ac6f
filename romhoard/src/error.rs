//! Error types for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::library::archive::ArchiveError;
use crate::library::collection_archive::CollectionArchiveError;
use crate::library::collections::{CollectionError, ImportError};
use crate::library::download::DownloadError;
use crate::library::merge::MergeError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a scan already running for the path
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", err.to_string()),
            ApiError::Other(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string()),
        };

        if status.is_server_error() {
            error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<romhoard_common::Error> for ApiError {
    fn from(err: romhoard_common::Error) -> Self {
        use romhoard_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Io(e) => ApiError::Io(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("Database error: {}", err))
    }
}

impl From<MergeError> for ApiError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::NotFound(_) => ApiError::NotFound(err.to_string()),
            MergeError::Database(e) => e.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<CollectionError> for ApiError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::NotFound(msg) => ApiError::NotFound(msg),
            CollectionError::InvalidInput(msg) => ApiError::BadRequest(msg),
            CollectionError::Conflict(msg) => ApiError::Conflict(msg),
            CollectionError::Database(e) => e.into(),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Invalid(msg) => ApiError::BadRequest(msg),
            ImportError::Conflict(msg) => ApiError::Conflict(msg),
            ImportError::Database(e) => e.into(),
        }
    }
}

impl From<CollectionArchiveError> for ApiError {
    fn from(err: CollectionArchiveError) -> Self {
        match err {
            CollectionArchiveError::Invalid(msg) => ApiError::BadRequest(msg),
            CollectionArchiveError::Collection(e) => e.into(),
            CollectionArchiveError::Import(e) => e.into(),
            CollectionArchiveError::Database(e) => e.into(),
            CollectionArchiveError::Io(e) => ApiError::Io(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::EntryNotFound(_) => ApiError::NotFound(err.to_string()),
            ArchiveError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotFound(msg) => ApiError::NotFound(msg),
            DownloadError::NoRoms(_) | DownloadError::AllMissing(_) | DownloadError::NoGames => {
                ApiError::NotFound(err.to_string())
            }
            DownloadError::Archive(e) => e.into(),
            DownloadError::Database(e) => e.into(),
            DownloadError::Io(e) => ApiError::Io(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_to_status() {
        let not_found: ApiError = romhoard_common::Error::NotFound("Game 7".into()).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let invalid: ApiError = romhoard_common::Error::InvalidInput("bad".into()).into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let conflict: ApiError = CollectionError::Conflict("taken".into()).into();
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let self_merge: ApiError = MergeError::SelfMerge.into();
        assert_eq!(self_merge.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
