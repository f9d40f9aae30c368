//! src/services/metadata_store.rs
//!
//! Chunk, file and ownership indices. `MetadataStore` is the contract the
//! orchestrators depend on; `SqliteMetadataStore` implements it on SQLite.
//!
//! Write grouping:
//! - all chunk records of one upload: one transaction, in split order
//! - a file record and its ordered chunk list: one transaction
//! - adding a file to an owner: one transaction that upserts the user,
//!   refreshes `last_accessed_on` and inserts the ownership row. The
//!   `(email, file_id)` key makes the file set a union that can only grow,
//!   so concurrent uploads for the same user cannot lose each other's rows.

use crate::models::{
    chunk::{Chunk, ChunkId},
    file::{FileId, FileRecord},
    user::User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("{entity} `{key}` not found")]
    NotFound { entity: &'static str, key: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl MetadataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound { .. })
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert chunk records, preserving slice order.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> MetadataResult<()>;

    async fn get_chunk(&self, id: ChunkId) -> MetadataResult<Chunk>;

    /// Insert a file record together with its ordered chunk list.
    async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()>;

    async fn get_file(&self, id: FileId) -> MetadataResult<FileRecord>;

    /// Fetch a user by email. Does not create one.
    async fn get_user(&self, email: &str) -> MetadataResult<User>;

    /// Create the user if absent and refresh `last_accessed_on`.
    async fn touch_user(&self, email: &str, at: DateTime<Utc>) -> MetadataResult<User>;

    /// Atomically add `file_id` to the user's file set, creating the user if
    /// absent and refreshing `last_accessed_on`. Previously owned files are
    /// always kept.
    async fn add_file_to_user(
        &self,
        email: &str,
        file_id: FileId,
        at: DateTime<Utc>,
    ) -> MetadataResult<User>;

    async fn ping(&self) -> MetadataResult<()>;
}

/// SQLite-backed metadata store. Constructed once at startup and shared
/// through `Arc`; the pool handles concurrent access.
#[derive(Clone, Debug)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> MetadataResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }

    #[cfg(test)]
    pub async fn count_rows(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    #[cfg(test)]
    pub async fn delete_chunk(&self, id: ChunkId) {
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    #[cfg(test)]
    pub async fn link_file_unchecked(&self, email: &str, file_id: FileId) {
        sqlx::query("INSERT INTO user_files (email, file_id, added_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(file_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

/// Load a user row and its owned file ids, in the order they were added.
async fn load_user(conn: &mut SqliteConnection, email: &str) -> MetadataResult<User> {
    let mut user = sqlx::query_as::<_, User>(
        "SELECT email, created_at, last_accessed_on FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| MetadataError::NotFound {
        entity: "user",
        key: email.to_string(),
    })?;

    user.files = sqlx::query_scalar::<_, FileId>(
        "SELECT file_id FROM user_files WHERE email = ? ORDER BY rowid ASC",
    )
    .bind(email)
    .fetch_all(&mut *conn)
    .await?;

    Ok(user)
}

/// Insert the user or refresh `last_accessed_on`; never touches the file set.
async fn upsert_user(conn: &mut SqliteConnection, email: &str, at: DateTime<Utc>) -> MetadataResult<()> {
    sqlx::query(
        "INSERT INTO users (email, created_at, last_accessed_on) VALUES (?, ?, ?)
         ON CONFLICT(email) DO UPDATE SET last_accessed_on = excluded.last_accessed_on",
    )
    .bind(email)
    .bind(at)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query("INSERT INTO chunks (id, content_hash, created_at) VALUES (?, ?, ?)")
                .bind(chunk.id)
                .bind(&chunk.content_hash)
                .bind(chunk.created_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, id: ChunkId) -> MetadataResult<Chunk> {
        sqlx::query_as::<_, Chunk>("SELECT id, content_hash, created_at FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound {
                entity: "chunk",
                key: id.to_string(),
            })
    }

    async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO files (id, name, media_type, size_bytes, etag, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(&file.media_type)
        .bind(file.size_bytes)
        .bind(&file.etag)
        .bind(file.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, chunk_id) in file.chunk_ids.iter().enumerate() {
            sqlx::query("INSERT INTO file_chunks (file_id, position, chunk_id) VALUES (?, ?, ?)")
                .bind(file.id)
                .bind(position as i64)
                .bind(*chunk_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_file(&self, id: FileId) -> MetadataResult<FileRecord> {
        let mut file = sqlx::query_as::<_, FileRecord>(
            "SELECT id, name, media_type, size_bytes, etag, created_at FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MetadataError::NotFound {
            entity: "file",
            key: id.to_string(),
        })?;

        file.chunk_ids = sqlx::query_scalar::<_, ChunkId>(
            "SELECT chunk_id FROM file_chunks WHERE file_id = ? ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(file)
    }

    async fn get_user(&self, email: &str) -> MetadataResult<User> {
        let mut conn = self.pool.acquire().await?;
        load_user(&mut conn, email).await
    }

    async fn touch_user(&self, email: &str, at: DateTime<Utc>) -> MetadataResult<User> {
        let mut tx = self.pool.begin().await?;
        upsert_user(&mut tx, email, at).await?;
        let user = load_user(&mut tx, email).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn add_file_to_user(
        &self,
        email: &str,
        file_id: FileId,
        at: DateTime<Utc>,
    ) -> MetadataResult<User> {
        let mut tx = self.pool.begin().await?;
        upsert_user(&mut tx, email, at).await?;
        sqlx::query("INSERT OR IGNORE INTO user_files (email, file_id, added_at) VALUES (?, ?, ?)")
            .bind(email)
            .bind(file_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        let user = load_user(&mut tx, email).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn ping(&self) -> MetadataResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        if one != 1 {
            return Err(MetadataError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected probe result: {one}"
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> SqliteMetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteMetadataStore::new(pool);
    store.migrate().await.unwrap();
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn file_with_chunks(chunk_ids: Vec<ChunkId>) -> FileRecord {
        FileRecord {
            id: FileId::new(),
            name: "notes.txt".into(),
            media_type: "txt".into(),
            size_bytes: 7,
            etag: "etag".into(),
            created_at: Utc::now(),
            chunk_ids,
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = memory_store().await;
        store.migrate().await.unwrap();
        assert_eq!(store.count_rows("chunks").await, 0);
    }

    #[tokio::test]
    async fn chunks_round_trip_and_allow_duplicate_hashes() {
        let store = memory_store().await;
        let a = Chunk::new("same-hash");
        let b = Chunk::new("same-hash");
        store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();

        assert_eq!(store.get_chunk(a.id).await.unwrap().content_hash, "same-hash");
        assert_eq!(store.get_chunk(b.id).await.unwrap().id, b.id);
        assert_eq!(store.count_rows("chunks").await, 2);
    }

    #[tokio::test]
    async fn missing_chunk_is_not_found() {
        let store = memory_store().await;
        let err = store.get_chunk(ChunkId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn file_chunk_order_is_preserved() {
        let store = memory_store().await;
        let ids: Vec<ChunkId> = (0..5).map(|_| ChunkId::new()).collect();
        let mut reversed = ids.clone();
        reversed.reverse();
        let file = file_with_chunks(reversed.clone());
        store.insert_file(&file).await.unwrap();

        let loaded = store.get_file(file.id).await.unwrap();
        assert_eq!(loaded.chunk_ids, reversed);
        assert_eq!(loaded.name, "notes.txt");
        assert_eq!(loaded.size_bytes, 7);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let store = memory_store().await;
        let err = store.get_file(FileId::new()).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound { entity: "file", .. }));
    }

    #[tokio::test]
    async fn get_user_does_not_create() {
        let store = memory_store().await;
        assert!(store.get_user("nobody@example.com").await.unwrap_err().is_not_found());
        assert_eq!(store.count_rows("users").await, 0);
    }

    #[tokio::test]
    async fn touch_user_creates_then_refreshes_access_time() {
        let store = memory_store().await;
        let first = Utc::now() - chrono::Duration::hours(1);
        let created = store.touch_user("a@example.com", first).await.unwrap();
        assert!(created.files.is_empty());

        let later = Utc::now();
        let touched = store.touch_user("a@example.com", later).await.unwrap();
        assert_eq!(touched.created_at, created.created_at);
        assert!(touched.last_accessed_on > created.last_accessed_on);
        assert_eq!(store.count_rows("users").await, 1);
    }

    #[tokio::test]
    async fn adding_files_is_a_union() {
        let store = memory_store().await;
        let (f1, f2) = (FileId::new(), FileId::new());

        store.add_file_to_user("a@example.com", f1, Utc::now()).await.unwrap();
        let user = store.add_file_to_user("a@example.com", f2, Utc::now()).await.unwrap();
        assert_eq!(user.files, vec![f1, f2]);

        let again = store.add_file_to_user("a@example.com", f1, Utc::now()).await.unwrap();
        assert_eq!(again.files, vec![f1, f2]);

        let touched = store.touch_user("a@example.com", Utc::now()).await.unwrap();
        assert_eq!(touched.files, vec![f1, f2]);
    }

    #[tokio::test]
    async fn concurrent_adds_for_one_user_keep_every_file() {
        let store = Arc::new(memory_store().await);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = FileId::new();
                store.add_file_to_user("busy@example.com", id, Utc::now()).await.unwrap();
                id
            }));
        }
        let mut expected = Vec::new();
        for handle in handles {
            expected.push(handle.await.unwrap());
        }

        let user = store.get_user("busy@example.com").await.unwrap();
        assert_eq!(user.files.len(), 16);
        assert!(expected.iter().all(|id| user.files.contains(id)));
    }

    #[tokio::test]
    async fn users_do_not_see_each_others_files() {
        let store = memory_store().await;
        let f = FileId::new();
        store.add_file_to_user("a@example.com", f, Utc::now()).await.unwrap();
        let b = store.touch_user("b@example.com", Utc::now()).await.unwrap();
        assert!(b.files.is_empty());
    }

    #[tokio::test]
    async fn ping_succeeds() {
        memory_store().await.ping().await.unwrap();
    }
}
