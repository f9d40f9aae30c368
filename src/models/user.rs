//! Represents a user and the files they own.

use super::file::FileId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An ownership index record, keyed by email.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct User {
    /// Natural key; no two users share an email.
    pub email: String,

    pub created_at: DateTime<Utc>,

    /// Refreshed on every authenticated request.
    pub last_accessed_on: DateTime<Utc>,

    /// Owned files in the order they were added. Only ever grows.
    #[sqlx(skip)]
    pub files: Vec<FileId>,
}
