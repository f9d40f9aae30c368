//! Authenticated identity extraction.
//!
//! Authentication happens upstream; this only trusts the configured header.
//! The first request from an identity creates its user record, and every
//! request refreshes `last_accessed_on`.

use crate::{errors::AppError, state::AppState};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

/// Email of the caller, threaded explicitly into vault operations.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub email: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let email = parts
            .headers
            .get(&state.identity_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.contains('@'))
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| AppError::unauthorized("no authenticated user email found"))?;

        let user = state.vault.register_user(&email).await?;
        debug!(email = %user.email, files = user.files.len(), "authenticated request");

        Ok(Self { email })
    }
}
