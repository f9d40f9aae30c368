use crate::services::vault_service::{VaultError, VaultErrorKind};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Validation and not-found errors carry their own message to the client.
/// Store and integrity faults are logged in full and answered generically.
impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        match err.kind() {
            VaultErrorKind::Validation => {
                let status = match &err {
                    VaultError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    VaultError::TypeUndetermined { .. } | VaultError::UnsupportedType { .. } => {
                        StatusCode::UNSUPPORTED_MEDIA_TYPE
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                AppError::new(status, err.to_string())
            }
            VaultErrorKind::NotFound => AppError::not_found(err.to_string()),
            VaultErrorKind::StoreUnavailable => {
                warn!(error = %err, "content store failure");
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage backend unavailable, try again later",
                )
            }
            VaultErrorKind::Integrity => {
                error!(target: "vault::integrity", error = %err, "metadata integrity violation");
                AppError::internal("something went wrong processing the file")
            }
            VaultErrorKind::Internal => {
                error!(error = %err, "internal failure");
                AppError::internal("something went wrong processing the file")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{chunk::ChunkId, file::FileId},
        services::{content_store::ContentStoreError, metadata_store::MetadataError},
    };
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn size_limit_maps_to_413_with_message() {
        let err = VaultError::SizeLimitExceeded { size: 11, limit: 10 };
        let (status, body) = response_parts(err.into()).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["status"], 413);
        assert!(body["error"].as_str().unwrap().contains("permissible limit"));
    }

    #[tokio::test]
    async fn type_errors_map_to_415() {
        for err in [
            VaultError::TypeUndetermined { hint: "".into() },
            VaultError::UnsupportedType {
                candidates: vec!["mp4".into()],
            },
        ] {
            let (status, _) = response_parts(err.into()).await;
            assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }
    }

    #[tokio::test]
    async fn read_and_empty_failures_map_to_400() {
        for err in [
            VaultError::EmptyFile,
            VaultError::ReadFailure(std::io::Error::other("reset")),
        ] {
            let (status, _) = response_parts(err.into()).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let (status, body) = response_parts(VaultError::FileNotFound(FileId::new()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn store_failures_hide_backend_details() {
        let err = VaultError::ContentStoreFailure(ContentStoreError::Unavailable(
            "connection refused to 10.0.0.7:5001".into(),
        ));
        let (status, body) = response_parts(err.into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body["error"].as_str().unwrap().contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn integrity_and_internal_faults_are_generic_500s() {
        for err in [
            VaultError::ChunkIndexCorrupt {
                file_id: FileId::new(),
                chunk_id: ChunkId::new(),
            },
            VaultError::Metadata(MetadataError::Sqlx(sqlx::Error::PoolTimedOut)),
        ] {
            let (status, body) = response_parts(err.into()).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["error"], "something went wrong processing the file");
        }
    }
}
