//! Routes for the vault HTTP surface.
//!
//! - `GET    /healthz`, `GET /readyz`: probes, no identity required
//! - `POST   /files`: multipart upload (field `file`)
//! - `GET    /files`: list the caller's files
//! - `PUT    /files/{key}`: raw upload, `key` is the file name
//! - `GET    /files/{key}`: download, `key` is the file id
//! - `GET    /user`: the caller's user record
//!
//! Every `/files` and `/user` route requires the identity header.

use crate::{
    handlers::{
        file_handlers::{download_file, list_files, upload_multipart, upload_raw},
        health_handlers::{healthz, readyz},
        user_handlers::get_current_user,
    },
    state::AppState,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Room for multipart boundaries and part headers on top of the file itself.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router. `max_file_size` bounds buffered request bodies.
pub fn routes(max_file_size: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", get(list_files).post(upload_multipart))
        .route("/files/{key}", get(download_file).put(upload_raw))
        .route("/user", get(get_current_user))
        .layer(DefaultBodyLimit::max(
            max_file_size.saturating_add(MULTIPART_OVERHEAD),
        ))
}
