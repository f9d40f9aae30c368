//! Represents one stored chunk of a file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Internally assigned chunk identifier.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A chunk index record.
///
/// Maps a chunk id to the hash returned by the content store. Two chunks may
/// carry the same `content_hash`; no uniqueness is enforced on it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Internal identifier, referenced by file records.
    pub id: ChunkId,

    /// Content-addressed hash of the chunk bytes, immutable once set.
    pub content_hash: String,

    /// When this record was written.
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(content_hash: impl Into<String>) -> Self {
        Self {
            id: ChunkId::new(),
            content_hash: content_hash.into(),
            created_at: Utc::now(),
        }
    }
}
