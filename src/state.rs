//! Shared request state handed to every handler.

use crate::services::vault_service::VaultService;
use axum::http::HeaderName;

#[derive(Clone)]
pub struct AppState {
    pub vault: VaultService,

    /// Header an upstream authenticating proxy fills with the caller's email.
    pub identity_header: HeaderName,
}

impl AppState {
    pub fn new(vault: VaultService, identity_header: HeaderName) -> Self {
        Self {
            vault,
            identity_header,
        }
    }
}
