//! # snapboard
//!
//! Headless host for the photo board sync engine.
//!
//! Opens the local mirror, connects to the remote board (or an in-process
//! one when no URL is configured), captures every image path passed on the
//! command line, and logs the board as it changes until Ctrl+C.

mod config;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snapboard_remote::{MemoryRepository, PhotoRepository, RestRepository};
use snapboard_shared::constants::APP_NAME;
use snapboard_store::{Database, LocalMirror};
use snapboard_sync::{CaptionGenerator, HttpCaptioner, OfflineCaptioner, SyncEngine};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,snapboard_sync=debug")),
        )
        .init();

    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = DaemonConfig::from_env();
    info!(
        remote = config.remote_url.as_deref().unwrap_or("in-process"),
        captions = config.caption_url.is_some(),
        poll_secs = config.poll_interval.as_secs(),
        mirror_capacity = config.mirror_capacity,
        retention_hours = config.retention.map(|r| r.num_hours()),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the local mirror and the collaborators
    // -----------------------------------------------------------------------
    let mirror = match &config.db_path {
        Some(path) => LocalMirror::open_at(path, config.mirror_config())?,
        None => LocalMirror::new(Database::new()?, config.mirror_config()),
    };

    let repo: Arc<dyn PhotoRepository> = match config.rest_config() {
        Some(rest) => {
            info!(url = %rest.base_url, bucket = %rest.bucket, "Using remote board");
            Arc::new(RestRepository::new(rest)?)
        }
        None => {
            info!("No SNAPBOARD_REMOTE_URL set, using in-process board");
            Arc::new(MemoryRepository::new(config.scope.clone()))
        }
    };

    let captioner: Arc<dyn CaptionGenerator> = match &config.caption_url {
        Some(url) => Arc::new(HttpCaptioner::new(url.clone(), config.request_timeout)?),
        None => {
            info!("No SNAPBOARD_CAPTION_URL set, photos get the fallback caption");
            Arc::new(OfflineCaptioner)
        }
    };

    // -----------------------------------------------------------------------
    // 4. Start the engine and log every published view
    // -----------------------------------------------------------------------
    let engine = SyncEngine::start(mirror, repo, captioner, config.sync_config());
    let handle = engine.handle();

    let mut view = handle.subscribe();
    info!(photos = view.borrow().len(), "Board loaded from local mirror");
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let photos = view.borrow_and_update().clone();
            match photos.first() {
                Some(newest) => info!(
                    photos = photos.len(),
                    newest = %newest.id,
                    caption = %newest.caption,
                    "Board updated"
                ),
                None => info!("Board is empty"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Capture the images given on the command line
    // -----------------------------------------------------------------------
    for path in std::env::args().skip(1) {
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let record = handle.capture(bytes).await?;
                info!(id = %record.id, path = %path, "Captured photo");
            }
            Err(e) => warn!(path = %path, error = %e, "Failed to read image, skipping"),
        }
    }

    // -----------------------------------------------------------------------
    // 6. Run until Ctrl+C
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    drop(handle);
    engine.shutdown().await;

    Ok(())
}
