mod client;
mod config;
mod probe;

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use clap::Parser;
use docsync_core::{CatalogDescriptor, EngineConfig, LocalStore, RemoteClient, SyncEngine};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch as tokio_watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::S3RemoteClient;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let catalog = config.catalog();
    if catalog.items().is_empty() {
        anyhow::bail!("the catalog needs at least one --item");
    }

    info!("Starting docsync-s3");
    info!("  Bucket: {}", config.bucket);
    info!("  Folder: {} ({} items)", catalog.folder_path(), catalog.items().len());
    info!("  Poll interval: {} secs", config.poll_interval().as_secs());

    let engine_config = EngineConfig::default().with_poll_interval(config.poll_interval());
    let store = match &config.cache_dir {
        Some(dir) => LocalStore::new(dir, &engine_config.cache_dir_name),
        None => LocalStore::from_platform("docsync", &engine_config.cache_dir_name)?,
    };
    info!("  Cache dir: {}", store.cache_dir().display());

    let remote: Arc<dyn RemoteClient> = Arc::new(create_remote_client(&config).await);
    if !remote.is_authorized() {
        warn!("No S3 credentials found, serving local content only");
    }

    let engine = SyncEngine::new(store, Some(remote), engine_config);

    if engine.load_local_files(&catalog)? {
        info!("Local cache complete");
    } else {
        info!("Local cache incomplete, waiting for the remote");
    }
    engine.prepare_content(&catalog).await;

    let (mut online_rx, probe_task) =
        probe::spawn(config.effective_probe_addr(), config.probe_interval());
    engine.attach_connectivity(online_rx.clone());

    let mut changes = engine.subscribe();
    let mut shutdown_rx = create_shutdown_signal();

    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for(|&v| v) => break,
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                // A failed startup sync is retried whenever the network comes back
                if online && !engine.is_prepared() {
                    engine.prepare_content(&catalog).await;
                }
            }
            event = changes.recv() => match event {
                Ok(item) => match engine.get(&item) {
                    Ok(entry) => info!("Updated {} to revision {}", item, entry.revision),
                    Err(e) => warn!("Updated {} but it is no longer readable: {}", item, e),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} change events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown();
    probe_task.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Build the S3 client from explicit keys or the default AWS credential chain.
async fn create_remote_client(config: &Config) -> S3RemoteClient {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

    if let Some((access_key_id, secret_access_key)) = config.static_credentials() {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "docsync",
        ));
    }

    let sdk_config = loader.load().await;
    let authorized = client::credentials_available(sdk_config.credentials_provider()).await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true);
    if let Some(endpoint) = &config.endpoint_url {
        builder = builder.endpoint_url(endpoint);
    }

    S3RemoteClient::new(
        aws_sdk_s3::Client::from_conf(builder.build()),
        config.bucket.clone(),
        authorized,
    )
}

/// Create a shutdown signal that triggers on Ctrl+C or SIGTERM.
fn create_shutdown_signal() -> tokio_watch::Receiver<bool> {
    let (tx, rx) = tokio_watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, initiating shutdown");
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating shutdown");
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        let _ = tx.send(true);
    });

    rx
}
