//! HTTP handlers for uploading, listing and downloading files.
//! Upload bodies are streamed into `VaultService`; chunking, hashing and
//! indexing all happen there.

use crate::{
    errors::AppError,
    handlers::identity::AuthenticatedUser,
    models::file::{FileId, FileRecord, FileSummary},
    services::{
        media_type,
        vault_service::UploadRequest,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::io;

/// Optional exact size of the `file` part of a multipart upload.
const FILE_SIZE_HEADER: &str = "x-file-size";

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: FileId,
    pub name: String,
    pub media_type: String,
    pub size_bytes: i64,
    pub etag: String,
    pub created_at: DateTime<Utc>,
}

impl From<FileRecord> for UploadResponse {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id,
            name: file.name,
            media_type: file.media_type,
            size_bytes: file.size_bytes,
            etag: file.etag,
            created_at: file.created_at,
        }
    }
}

/// `POST /files`: multipart upload, field `file`.
pub async fn upload_multipart(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let declared_size = header_u64(&headers, FILE_SIZE_HEADER)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {}", err)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let hint = type_hint(field.content_type(), &name);
        let body = field.map(|chunk| chunk.map_err(io::Error::other));

        let file = state
            .vault
            .create_file(
                &user.email,
                UploadRequest {
                    name,
                    media_type_hint: hint,
                    declared_size,
                    body,
                },
            )
            .await?;
        return Ok(created(file));
    }

    Err(AppError::bad_request(
        "failed to retrieve file from request: missing `file` field",
    ))
}

/// `PUT /files/{name}`: raw body upload. `Content-Type` is the type hint
/// and `Content-Length` the declared size.
pub async fn upload_raw(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let declared_size = header_u64(&headers, header::CONTENT_LENGTH.as_str())?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let hint = type_hint(content_type, &name);

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let file = state
        .vault
        .create_file(
            &user.email,
            UploadRequest {
                name,
                media_type_hint: hint,
                declared_size,
                body: stream,
            },
        )
        .await?;

    Ok(created(file))
}

/// `GET /files`: everything the caller owns, without content.
pub async fn list_files(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<FileSummary>>, AppError> {
    Ok(Json(state.vault.list_owned_files(&user.email).await?))
}

/// `GET /files/{id}`: reassemble and return a file the caller owns.
pub async fn download_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let file_id: FileId = id
        .parse()
        .map_err(|_| AppError::not_found(format!("file `{}` not found", id)))?;

    let (file, data) = state
        .vault
        .reconstruct_owned_file(&user.email, file_id)
        .await?;

    let mut response = Response::new(Body::from(data.clone()));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &file, data.len());
    Ok(response)
}

/// Prefer the declared content type; fall back to the name's extension.
fn type_hint(content_type: Option<&str>, name: &str) -> String {
    match content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
        Some(ct) => ct.to_string(),
        None => name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .unwrap_or_default(),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Result<Option<u64>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| AppError::bad_request(format!("invalid `{}` header", name)))
        })
        .transpose()
}

fn created(file: FileRecord) -> Response {
    let id = file.id;
    let etag = format!("\"{}\"", file.etag);
    let mut response = (StatusCode::CREATED, Json(UploadResponse::from(file))).into_response();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("/files/{}", id)) {
        headers.insert(header::LOCATION, value);
    }
    response
}

fn set_file_headers(headers: &mut HeaderMap, file: &FileRecord, length: usize) {
    let content_type = media_type::content_type_for(&file.media_type);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    let quoted = format!("\"{}\"", file.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted) {
        headers.insert(header::ETAG, value);
    }

    let safe_name: String = file
        .name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let last_modified = file
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

