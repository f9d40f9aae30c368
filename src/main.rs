use anyhow::{Context, Result};
use axum::{Router, http::HeaderName};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    config::{AppConfig, ContentStoreKind},
    services::{
        content_store::{ContentStore, ipfs::IpfsContentStore, local::LocalContentStore},
        metadata_store::SqliteMetadataStore,
        vault_service::VaultService,
    },
    state::AppState,
};

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting vault-service with config: {:?}", cfg);

    // --- Initialize metadata store ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating metadata directory {:?}", parent))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let metadata = SqliteMetadataStore::connect(&cfg.database_url, 5)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;
    metadata.migrate().await.context("applying schema")?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize content store ---
    let content: Arc<dyn ContentStore> = match cfg.content_store {
        ContentStoreKind::Local => {
            if !Path::new(&cfg.blob_dir).exists() {
                fs::create_dir_all(&cfg.blob_dir)?;
                tracing::info!("Created blob directory at {}", cfg.blob_dir);
            }
            Arc::new(LocalContentStore::new(&cfg.blob_dir))
        }
        ContentStoreKind::Ipfs => Arc::new(
            IpfsContentStore::new(&cfg.ipfs_url, cfg.store_timeout)
                .context("building IPFS client")?,
        ),
    };
    tracing::info!(backend = content.backend(), "content store ready");

    // --- Initialize core service ---
    let vault = VaultService::new(Arc::new(metadata), content, cfg.upload_policy());
    let identity_header = HeaderName::from_bytes(cfg.identity_header.as_bytes())
        .with_context(|| format!("invalid identity header `{}`", cfg.identity_header))?;
    let state = AppState::new(vault, identity_header);

    // --- Build router ---
    let body_limit = usize::try_from(cfg.max_file_size).unwrap_or(usize::MAX);
    let app: Router = routes::routes::routes(body_limit).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
