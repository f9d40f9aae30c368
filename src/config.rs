use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, num::NonZeroUsize, str::FromStr, time::Duration};

use crate::services::vault_service::UploadPolicy;

const MIB: u64 = 1024 * 1024;

/// Which content-addressable store holds chunk bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContentStoreKind {
    /// Sharded directory on local disk.
    Local,
    /// IPFS daemon reached through its HTTP API.
    Ipfs,
}

impl FromStr for ContentStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub content_store: ContentStoreKind,
    pub blob_dir: String,
    pub ipfs_url: String,
    pub max_file_size: u64,
    pub chunk_size: NonZeroUsize,
    pub store_timeout: Duration,
    pub store_concurrency: usize,
    pub identity_header: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked content-addressed file vault")]
pub struct Args {
    /// Host to bind to (overrides VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Metadata database URL (overrides VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Content store backend (overrides VAULT_CONTENT_STORE)
    #[arg(long, value_enum)]
    pub content_store: Option<ContentStoreKind>,

    /// Directory for the local content store (overrides VAULT_BLOB_DIR)
    #[arg(long)]
    pub blob_dir: Option<String>,

    /// IPFS HTTP API base URL (overrides VAULT_IPFS_URL)
    #[arg(long)]
    pub ipfs_url: Option<String>,

    /// Largest accepted upload in bytes (overrides VAULT_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Chunk size in bytes (overrides VAULT_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Per-call content store timeout in seconds (overrides VAULT_STORE_TIMEOUT_SECS)
    #[arg(long)]
    pub store_timeout_secs: Option<u64>,

    /// Chunk transfers in flight per request (overrides VAULT_STORE_CONCURRENCY)
    #[arg(long)]
    pub store_concurrency: Option<usize>,

    /// Header carrying the authenticated email (overrides VAULT_IDENTITY_HEADER)
    #[arg(long)]
    pub identity_header: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `key` from `lookup`, parsing it, or fall back to `default`.
fn setting<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over values found through `lookup`, then validate.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Environment fallback ---
        let env_host = setting(&lookup, "VAULT_HOST", "0.0.0.0".to_string())?;
        let env_port = setting(&lookup, "VAULT_PORT", 8080u16)?;
        let env_db = setting(
            &lookup,
            "VAULT_DATABASE_URL",
            "sqlite://./data/meta/vault.db".to_string(),
        )?;
        let env_store = setting(&lookup, "VAULT_CONTENT_STORE", ContentStoreKind::Local)?;
        let env_blob_dir = setting(&lookup, "VAULT_BLOB_DIR", "./data/blobs".to_string())?;
        let env_ipfs = setting(
            &lookup,
            "VAULT_IPFS_URL",
            "http://127.0.0.1:5001".to_string(),
        )?;
        let env_max = setting(&lookup, "VAULT_MAX_FILE_SIZE", 5 * MIB)?;
        let env_chunk = setting(&lookup, "VAULT_CHUNK_SIZE", MIB as usize)?;
        let env_timeout = setting(&lookup, "VAULT_STORE_TIMEOUT_SECS", 30u64)?;
        let env_concurrency = setting(&lookup, "VAULT_STORE_CONCURRENCY", 4usize)?;
        let env_header = setting(
            &lookup,
            "VAULT_IDENTITY_HEADER",
            "x-authenticated-email".to_string(),
        )?;

        // --- Merge ---
        let max_file_size = args.max_file_size.unwrap_or(env_max);
        if max_file_size == 0 {
            bail!("max file size must be greater than zero");
        }
        let chunk_size = NonZeroUsize::new(args.chunk_size.unwrap_or(env_chunk))
            .context("chunk size must be greater than zero")?;
        let store_concurrency = args.store_concurrency.unwrap_or(env_concurrency);
        if store_concurrency == 0 {
            bail!("store concurrency must be greater than zero");
        }
        let store_timeout = Duration::from_secs(args.store_timeout_secs.unwrap_or(env_timeout));
        if store_timeout.is_zero() {
            bail!("store timeout must be greater than zero");
        }
        let identity_header = args
            .identity_header
            .unwrap_or(env_header)
            .trim()
            .to_ascii_lowercase();
        if identity_header.is_empty() {
            bail!("identity header name must not be empty");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            content_store: args.content_store.unwrap_or(env_store),
            blob_dir: args.blob_dir.unwrap_or(env_blob_dir),
            ipfs_url: args.ipfs_url.unwrap_or(env_ipfs),
            max_file_size,
            chunk_size,
            store_timeout,
            store_concurrency,
            identity_header,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_file_size: self.max_file_size,
            chunk_size: self.chunk_size,
            store_timeout: self.store_timeout,
            store_concurrency: self.store_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::resolve(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.content_store, ContentStoreKind::Local);
        assert_eq!(cfg.max_file_size, 5 * MIB);
        assert_eq!(cfg.chunk_size.get(), MIB as usize);
        assert_eq!(cfg.store_timeout, Duration::from_secs(30));
        assert_eq!(cfg.identity_header, "x-authenticated-email");
    }

    #[test]
    fn env_overrides_defaults_and_args_override_env() {
        let env = lookup(&[
            ("VAULT_PORT", "9000"),
            ("VAULT_CONTENT_STORE", "IPFS"),
            ("VAULT_CHUNK_SIZE", "4096"),
            ("VAULT_MAX_FILE_SIZE", "10485760"),
        ]);
        let args = Args {
            port: Some(9100),
            ..Args::default()
        };
        let cfg = AppConfig::resolve(args, env).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.content_store, ContentStoreKind::Ipfs);
        assert_eq!(cfg.chunk_size.get(), 4096);
        assert_eq!(cfg.upload_policy().max_file_size, 10 * MIB);
    }

    #[test]
    fn unparseable_env_value_is_reported_with_key() {
        let err = AppConfig::resolve(Args::default(), lookup(&[("VAULT_PORT", "eighty")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("VAULT_PORT"));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        for (key, value) in [
            ("VAULT_CHUNK_SIZE", "0"),
            ("VAULT_MAX_FILE_SIZE", "0"),
            ("VAULT_STORE_CONCURRENCY", "0"),
            ("VAULT_STORE_TIMEOUT_SECS", "0"),
        ] {
            assert!(
                AppConfig::resolve(Args::default(), lookup(&[(key, value)])).is_err(),
                "{key}=0 should be rejected"
            );
        }
    }

    #[test]
    fn identity_header_is_normalized() {
        let cfg = AppConfig::resolve(
            Args::default(),
            lookup(&[("VAULT_IDENTITY_HEADER", " X-Forwarded-Email ")]),
        )
        .unwrap();
        assert_eq!(cfg.identity_header, "x-forwarded-email");
    }
}
