//! src/services/vault_service.rs
//!
//! VaultService: upload and retrieval orchestration over the content store
//! and the metadata indices.
//!
//! Upload runs through fixed stages and stops at the first failure:
//! `Validating → Splitting → StoringChunks → IndexingChunks → IndexingFile →
//! IndexingOwner → Complete`. A failure before `IndexingChunks` leaves no
//! metadata behind; blobs already written to the content store stay there
//! unreferenced. The three index writes are separate transactions, so a
//! crash between them can leave a file that no user owns.

use crate::{
    models::{
        chunk::{Chunk, ChunkId},
        file::{FileId, FileRecord, FileSummary},
        user::User,
    },
    services::{
        content_store::{ContentResult, ContentStore, ContentStoreError},
        media_type,
        metadata_store::{MetadataError, MetadataStore},
        splitter,
    },
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt, pin_mut, stream};
use std::{future::Future, io, num::NonZeroUsize, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("file size {size} bytes exceeds the permissible limit of {limit} bytes")]
    SizeLimitExceeded { size: u64, limit: u64 },
    #[error("uploaded file is empty")]
    EmptyFile,
    #[error("failed to infer the type of file uploaded from `{hint}`")]
    TypeUndetermined { hint: String },
    #[error(
        "unsupported file type uploaded (candidates: {candidates:?}); accepted types are jpg, jpeg, png, gif, pdf, txt, doc, docx"
    )]
    UnsupportedType { candidates: Vec<String> },
    #[error("failed to read uploaded file: {0}")]
    ReadFailure(#[source] io::Error),
    #[error("failed to store file content: {0}")]
    ContentStoreFailure(#[source] ContentStoreError),
    #[error("content `{hash}` unavailable: {source}")]
    ContentUnavailable {
        hash: String,
        #[source]
        source: ContentStoreError,
    },
    #[error("user `{0}` not found")]
    UserNotFound(String),
    #[error("file `{0}` not found")]
    FileNotFound(FileId),
    #[error("file `{file_id}` references chunk `{chunk_id}` missing from the chunk index")]
    ChunkIndexCorrupt { file_id: FileId, chunk_id: ChunkId },
    #[error("user `{identity}` references file `{file_id}` missing from the file index")]
    DanglingFileReference { identity: String, file_id: FileId },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Coarse classification used to pick the client-facing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultErrorKind {
    /// Caller-correctable rejection.
    Validation,
    NotFound,
    /// Collaborator transport fault; retrying the whole operation is safe.
    StoreUnavailable,
    /// Index invariant violated: a bug, not missing data.
    Integrity,
    Internal,
}

impl VaultError {
    pub fn kind(&self) -> VaultErrorKind {
        match self {
            VaultError::SizeLimitExceeded { .. }
            | VaultError::EmptyFile
            | VaultError::TypeUndetermined { .. }
            | VaultError::UnsupportedType { .. }
            | VaultError::ReadFailure(_) => VaultErrorKind::Validation,
            VaultError::UserNotFound(_) | VaultError::FileNotFound(_) => VaultErrorKind::NotFound,
            VaultError::ContentStoreFailure(_) | VaultError::ContentUnavailable { .. } => {
                VaultErrorKind::StoreUnavailable
            }
            VaultError::ChunkIndexCorrupt { .. } | VaultError::DanglingFileReference { .. } => {
                VaultErrorKind::Integrity
            }
            VaultError::Metadata(_) => VaultErrorKind::Internal,
        }
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Validating,
    Splitting,
    StoringChunks,
    IndexingChunks,
    IndexingFile,
    IndexingOwner,
    Complete,
}

/// Size, chunking and transfer limits applied to every upload.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub chunk_size: NonZeroUsize,
    /// Deadline for each individual content store call.
    pub store_timeout: Duration,
    /// Chunk transfers in flight per upload or download.
    pub store_concurrency: usize,
}

/// One incoming upload.
pub struct UploadRequest<S> {
    pub name: String,
    /// Content type (`image/png`) or bare extension (`png`).
    pub media_type_hint: String,
    /// Size claimed by the caller, checked before any byte is read.
    pub declared_size: Option<u64>,
    pub body: S,
}

#[derive(Clone)]
pub struct VaultService {
    pub metadata: Arc<dyn MetadataStore>,
    pub content: Arc<dyn ContentStore>,
    pub policy: UploadPolicy,
}

/// Run a content store call under the per-call deadline.
async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = ContentResult<T>>,
) -> ContentResult<T> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(ContentStoreError::Timeout(timeout)))
}

impl VaultService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        content: Arc<dyn ContentStore>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            metadata,
            content,
            policy,
        }
    }

    /// Store an upload for `owner` and return the new file record.
    ///
    /// Preconditions are checked in order (declared size, media type, body
    /// readability) and the first failing one is reported.
    pub async fn create_file<S>(
        &self,
        owner: &str,
        request: UploadRequest<S>,
    ) -> VaultResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let name = request.name.clone();
        let mut stage = UploadStage::Validating;

        match self.run_upload(owner, request, &mut stage).await {
            Ok(file) => {
                info!(
                    owner,
                    file_id = %file.id,
                    name = %file.name,
                    chunks = file.chunk_ids.len(),
                    size = file.size_bytes,
                    "file uploaded"
                );
                Ok(file)
            }
            Err(err) => {
                warn!(owner, name = %name, stage = ?stage, error = %err, "upload failed");
                Err(err)
            }
        }
    }

    fn advance(&self, stage: &mut UploadStage, next: UploadStage) {
        debug!(from = ?*stage, to = ?next, "upload stage");
        *stage = next;
    }

    async fn run_upload<S>(
        &self,
        owner: &str,
        request: UploadRequest<S>,
        stage: &mut UploadStage,
    ) -> VaultResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let limit = self.policy.max_file_size;
        if let Some(declared) = request.declared_size {
            if declared > limit {
                return Err(VaultError::SizeLimitExceeded {
                    size: declared,
                    limit,
                });
            }
        }

        let candidates = media_type::candidates(&request.media_type_hint);
        if candidates.is_empty() {
            return Err(VaultError::TypeUndetermined {
                hint: request.media_type_hint,
            });
        }
        let Some(media_type) = media_type::first_accepted(&candidates) else {
            return Err(VaultError::UnsupportedType { candidates });
        };

        let (data, etag) = self.read_body(request.body).await?;
        if data.is_empty() {
            return Err(VaultError::EmptyFile);
        }

        self.advance(stage, UploadStage::Splitting);
        let pieces = splitter::split(&data, self.policy.chunk_size);

        self.advance(stage, UploadStage::StoringChunks);
        let hashes = self.store_chunks(pieces).await?;

        self.advance(stage, UploadStage::IndexingChunks);
        let chunks: Vec<Chunk> = hashes.into_iter().map(Chunk::new).collect();
        self.metadata.insert_chunks(&chunks).await?;

        self.advance(stage, UploadStage::IndexingFile);
        let file = FileRecord {
            id: FileId::new(),
            name: request.name,
            media_type: media_type.to_string(),
            size_bytes: data.len() as i64,
            etag,
            created_at: Utc::now(),
            chunk_ids: chunks.iter().map(|chunk| chunk.id).collect(),
        };
        self.metadata.insert_file(&file).await?;

        self.advance(stage, UploadStage::IndexingOwner);
        self.metadata
            .add_file_to_user(owner, file.id, Utc::now())
            .await?;

        self.advance(stage, UploadStage::Complete);
        Ok(file)
    }

    /// Drain the body, enforcing the size ceiling on bytes actually received
    /// and computing the MD5 etag on the way.
    async fn read_body<S>(&self, body: S) -> VaultResult<(Bytes, String)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let limit = self.policy.max_file_size;
        let mut buffer = BytesMut::new();
        let mut digest = md5::Context::new();

        pin_mut!(body);
        while let Some(next) = body.next().await {
            let piece = next.map_err(VaultError::ReadFailure)?;
            let size = (buffer.len() + piece.len()) as u64;
            if size > limit {
                return Err(VaultError::SizeLimitExceeded { size, limit });
            }
            digest.consume(&piece);
            buffer.extend_from_slice(&piece);
        }

        Ok((buffer.freeze(), format!("{:x}", digest.compute())))
    }

    /// Put every chunk, several at a time. `buffered` yields results in
    /// input order, so the returned hashes line up with `pieces`.
    async fn store_chunks(&self, pieces: Vec<Bytes>) -> VaultResult<Vec<String>> {
        let timeout = self.policy.store_timeout;
        let content = &self.content;

        stream::iter(pieces)
            .map(|piece| bounded(timeout, content.put(piece)))
            .buffered(self.policy.store_concurrency.max(1))
            .try_collect::<Vec<String>>()
            .await
            .map_err(VaultError::ContentStoreFailure)
    }

    /// Summaries of every file `identity` owns, in upload order. An unknown
    /// identity owns nothing and gets an empty list.
    pub async fn list_owned_files(&self, identity: &str) -> VaultResult<Vec<FileSummary>> {
        let user = match self.metadata.get_user(identity).await {
            Ok(user) => user,
            Err(err) if err.is_not_found() => {
                debug!(identity, "no user record; listing zero files");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut summaries = Vec::with_capacity(user.files.len());
        for file_id in user.files {
            let file = self.owned_file(identity, file_id).await?;
            let content_hashes = self.resolve_hashes(&file).await?;
            summaries.push(FileSummary {
                id: file.id,
                name: file.name,
                media_type: file.media_type,
                size_bytes: file.size_bytes,
                content_hashes,
            });
        }

        Ok(summaries)
    }

    /// Rebuild a file's bytes from its chunks. All or nothing.
    pub async fn reconstruct_file(&self, file_id: FileId) -> VaultResult<Bytes> {
        let file = self.metadata.get_file(file_id).await.map_err(|err| {
            if err.is_not_found() {
                VaultError::FileNotFound(file_id)
            } else {
                err.into()
            }
        })?;
        self.reconstruct(&file).await
    }

    /// Like [`reconstruct_file`](Self::reconstruct_file), but only for files
    /// `identity` owns. Files owned by someone else look absent.
    pub async fn reconstruct_owned_file(
        &self,
        identity: &str,
        file_id: FileId,
    ) -> VaultResult<(FileRecord, Bytes)> {
        let owns = match self.metadata.get_user(identity).await {
            Ok(user) => user.files.contains(&file_id),
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err.into()),
        };
        if !owns {
            return Err(VaultError::FileNotFound(file_id));
        }

        let file = self.owned_file(identity, file_id).await?;
        let data = self.reconstruct(&file).await?;
        Ok((file, data))
    }

    pub async fn get_user(&self, identity: &str) -> VaultResult<User> {
        self.metadata.get_user(identity).await.map_err(|err| {
            if err.is_not_found() {
                VaultError::UserNotFound(identity.to_string())
            } else {
                err.into()
            }
        })
    }

    /// Create the user on first contact and refresh `last_accessed_on`.
    pub async fn register_user(&self, identity: &str) -> VaultResult<User> {
        Ok(self.metadata.touch_user(identity, Utc::now()).await?)
    }

    /// Load a file a user record points at; absence is an integrity fault.
    async fn owned_file(&self, identity: &str, file_id: FileId) -> VaultResult<FileRecord> {
        match self.metadata.get_file(file_id).await {
            Ok(file) => Ok(file),
            Err(err) if err.is_not_found() => {
                error!(
                    target: "vault::integrity",
                    identity,
                    %file_id,
                    "ownership index references a missing file"
                );
                Err(VaultError::DanglingFileReference {
                    identity: identity.to_string(),
                    file_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Content hashes of `file`'s chunks, in chunk order.
    async fn resolve_hashes(&self, file: &FileRecord) -> VaultResult<Vec<String>> {
        let mut hashes = Vec::with_capacity(file.chunk_ids.len());
        for &chunk_id in &file.chunk_ids {
            match self.metadata.get_chunk(chunk_id).await {
                Ok(chunk) => hashes.push(chunk.content_hash),
                Err(err) if err.is_not_found() => {
                    error!(
                        target: "vault::integrity",
                        file_id = %file.id,
                        %chunk_id,
                        "file references a chunk missing from the chunk index"
                    );
                    return Err(VaultError::ChunkIndexCorrupt {
                        file_id: file.id,
                        chunk_id,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(hashes)
    }

    /// Fetch chunks concurrently but concatenate strictly in list order.
    async fn reconstruct(&self, file: &FileRecord) -> VaultResult<Bytes> {
        let hashes = self.resolve_hashes(file).await?;
        let timeout = self.policy.store_timeout;
        let content = &self.content;

        let parts: Vec<Bytes> = stream::iter(hashes)
            .map(|hash| async move {
                let fetched = bounded(timeout, content.get(&hash)).await;
                fetched.map_err(|source| VaultError::ContentUnavailable { hash, source })
            })
            .buffered(self.policy.store_concurrency.max(1))
            .try_collect()
            .await?;

        if let [single] = parts.as_slice() {
            return Ok(single.clone());
        }

        let mut joined = BytesMut::with_capacity(parts.iter().map(Bytes::len).sum());
        for part in &parts {
            joined.extend_from_slice(part);
        }
        debug!(file_id = %file.id, chunks = parts.len(), size = joined.len(), "file reconstructed");
        Ok(joined.freeze())
    }
}
