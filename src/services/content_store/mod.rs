//! Content-addressable blob store contract.
//!
//! The vault never interprets hashes: it stores whatever `put` returns and
//! later hands the same value back to `get`. Implementations must keep `put`
//! content-deterministic and must report an unknown hash as
//! [`ContentStoreError::NotFound`], distinct from transport failures.

pub mod ipfs;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("content store unavailable: {0}")]
    Unavailable(String),
    #[error("content store rejected the payload: {0}")]
    Rejected(String),
    #[error("no object with hash `{0}`")]
    NotFound(String),
    #[error("content store call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<io::Error> for ContentStoreError {
    fn from(err: io::Error) -> Self {
        ContentStoreError::Unavailable(err.to_string())
    }
}

pub type ContentResult<T> = Result<T, ContentStoreError>;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `data` and return its content hash.
    async fn put(&self, data: Bytes) -> ContentResult<String>;

    /// Fetch the bytes previously stored under `hash`.
    async fn get(&self, hash: &str) -> ContentResult<Bytes>;

    /// Cheap connectivity probe used by readiness checks.
    async fn ping(&self) -> ContentResult<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Scriptable in-memory store for orchestrator tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Hands out hashes from a script (or `h1`, `h2`, ... once exhausted),
    /// and can be told to fail the n-th `put` or every `get`.
    #[derive(Default)]
    pub struct ScriptedContentStore {
        script: Mutex<VecDeque<String>>,
        objects: Mutex<HashMap<String, Bytes>>,
        puts: AtomicUsize,
        fail_put_at: Option<usize>,
        fail_gets: bool,
        put_delay: Option<Duration>,
    }

    impl ScriptedContentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_hashes(hashes: &[&str]) -> Self {
            Self {
                script: Mutex::new(hashes.iter().map(|h| h.to_string()).collect()),
                ..Self::default()
            }
        }

        /// Fail the `n`-th put (1-based) with `Unavailable`.
        pub fn failing_put_at(mut self, n: usize) -> Self {
            self.fail_put_at = Some(n);
            self
        }

        pub fn failing_gets(mut self) -> Self {
            self.fail_gets = true;
            self
        }

        pub fn with_put_delay(mut self, delay: Duration) -> Self {
            self.put_delay = Some(delay);
            self
        }

        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        pub fn forget(&self, hash: &str) {
            self.objects.lock().unwrap().remove(hash);
        }
    }

    #[async_trait]
    impl ContentStore for ScriptedContentStore {
        async fn put(&self, data: Bytes) -> ContentResult<String> {
            let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.put_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_put_at == Some(n) {
                return Err(ContentStoreError::Unavailable("scripted put failure".into()));
            }
            let hash = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| format!("h{n}"));
            self.objects.lock().unwrap().insert(hash.clone(), data);
            Ok(hash)
        }

        async fn get(&self, hash: &str) -> ContentResult<Bytes> {
            if self.fail_gets {
                return Err(ContentStoreError::Unavailable("scripted get failure".into()));
            }
            self.objects
                .lock()
                .unwrap()
                .get(hash)
                .cloned()
                .ok_or_else(|| ContentStoreError::NotFound(hash.to_string()))
        }

        async fn ping(&self) -> ContentResult<()> {
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "scripted"
        }
    }
}
