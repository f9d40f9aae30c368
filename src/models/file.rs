//! Represents an uploaded file and the ordered chunks that rebuild it.

use super::chunk::ChunkId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Identifier of a file record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FileId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A file index record.
///
/// `chunk_ids` order is the byte concatenation order used to rebuild the
/// file; it is never reordered after creation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,

    /// Display name supplied by the uploader.
    pub name: String,

    /// Accepted extension the upload was stored as (e.g. `png`).
    pub media_type: String,

    /// Total size in bytes.
    pub size_bytes: i64,

    /// MD5 of the whole file, hex encoded.
    pub etag: String,

    pub created_at: DateTime<Utc>,

    /// Ordered chunk list, loaded from `file_chunks`.
    #[sqlx(skip)]
    pub chunk_ids: Vec<ChunkId>,
}

/// What a user sees when listing their files: metadata plus the content
/// hashes of each chunk, without fetching any bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileSummary {
    pub id: FileId,
    pub name: String,
    pub media_type: String,
    pub size_bytes: i64,
    #[serde(rename = "cids")]
    pub content_hashes: Vec<String>,
}
