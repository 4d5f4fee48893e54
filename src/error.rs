//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io::ErrorKind;
use tracing::warn;

use crate::archive::ArchiveError;
use crate::http::Reply;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    UnsupportedMediaType(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::UnsupportedMediaType(msg)
            | ApiError::Internal(msg) => msg,
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(Reply::failure(message))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::PathEscape(_)
            | StorageError::RootRemoval
            | StorageError::CopyIntoSelf
            | StorageError::SymlinkComponent(_)
            | StorageError::NotAFile
            | StorageError::BinaryContent => ApiError::BadRequest(error.to_string()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("file or directory not found".into()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(error: ArchiveError) -> Self {
        match error {
            ArchiveError::MissingInput(_) => ApiError::NotFound(error.to_string()),
            ArchiveError::UnrecognizedFormat => ApiError::UnsupportedMediaType(error.to_string()),
            ArchiveError::Io(err) if err.kind() == ErrorKind::NotFound => {
                ApiError::NotFound(err.to_string())
            }
            ArchiveError::UnsupportedPlatform { .. }
            | ArchiveError::Permission { .. }
            | ArchiveError::CompressionFailed(_)
            | ArchiveError::ExtractionFailed { .. }
            | ArchiveError::Io(_) => ApiError::Internal(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn storage_errors_map_to_statuses() {
        let escape: ApiError = StorageError::PathEscape("..".into()).into();
        assert_eq!(escape.status(), StatusCode::BAD_REQUEST);

        let binary: ApiError = StorageError::BinaryContent.into();
        assert_eq!(binary.status(), StatusCode::BAD_REQUEST);

        let missing: ApiError = StorageError::Io(io::Error::from(ErrorKind::NotFound)).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let denied: ApiError =
            StorageError::Io(io::Error::from(ErrorKind::PermissionDenied)).into();
        assert_eq!(denied.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn archive_errors_map_to_statuses() {
        let unknown: ApiError = ArchiveError::UnrecognizedFormat.into();
        assert_eq!(unknown.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let missing: ApiError = ArchiveError::MissingInput(PathBuf::from("/x")).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let permission: ApiError = ArchiveError::Permission {
            path: PathBuf::from("/bin/7za"),
            source: io::Error::from(ErrorKind::PermissionDenied),
        }
        .into();
        match permission {
            ApiError::Internal(message) => assert!(message.contains("executable")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
