//! Disk-backed content-addressable store.
//!
//! Objects are keyed by the lowercase hex SHA-256 of their bytes and sharded
//! beneath `base_path/{hash[0..2]}/{hash[2..4]}/{hash}` to keep directory
//! sizes bounded. Writes go to a temp file, are fsynced, then renamed into
//! place, so a reader never observes a partial object.

use super::{ContentResult, ContentStore, ContentStoreError};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct LocalContentStore {
    base_path: PathBuf,
}

impl LocalContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn hash(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Only well-formed hashes are mapped to paths, which rules out
    /// traversal through the `get` argument.
    fn is_valid_hash(hash: &str) -> bool {
        hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(&hash[0..2]);
        path.push(&hash[2..4]);
        path.push(hash);
        path
    }

    async fn write_atomically(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn put(&self, data: Bytes) -> ContentResult<String> {
        let hash = Self::hash(&data);
        let path = self.object_path(&hash);

        if fs::try_exists(&path).await? {
            debug!("object {} already present", hash);
            return Ok(hash);
        }

        self.write_atomically(&path, &data).await?;
        debug!("stored object {} ({} bytes)", hash, data.len());
        Ok(hash)
    }

    async fn get(&self, hash: &str) -> ContentResult<Bytes> {
        if !Self::is_valid_hash(hash) {
            return Err(ContentStoreError::NotFound(hash.to_string()));
        }
        match fs::read(self.object_path(hash)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ContentStoreError::NotFound(hash.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write, read back and delete a probe file under `base_path`.
    async fn ping(&self) -> ContentResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(ContentStoreError::Unavailable(
                "probe file content mismatch".into(),
            ));
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
