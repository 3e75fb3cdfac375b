//! Daemon lifecycle: storage, health check, metrics, API server

use anyhow::{Context, Result};
use mapstore_core::config::MapStoreConfig;
use mapstore_ingest::MapStore;
use mapstore_storage::{FileSystem, OpendalFileSystem, S3Credentials};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::api::{self, AppState};
use crate::metrics::{self, ApiMetrics, HealthState, Registry};

/// Secrets loaded from the environment, never from the config file.
#[derive(Default)]
pub struct Secrets {
    pub s3: Option<S3Credentials>,
    pub api_key: Option<SecretString>,
}

pub async fn run(config: MapStoreConfig, secrets: Secrets) -> Result<()> {
    info!(backend = ?config.storage.backend, "daemon starting");

    let operator = mapstore_storage::build_from_core_config(&config.storage, secrets.s3.as_ref())?;
    let fs: Arc<dyn FileSystem> = Arc::new(OpendalFileSystem::new(operator));
    match fs.check_writable().await {
        Ok(()) => info!(backend = ?config.storage.backend, "storage: writable"),
        // keep going; /readyz reports it until the backend comes up
        Err(e) => warn!(backend = ?config.storage.backend, "storage: {e}"),
    }
    let store = MapStore::with_defaults(fs.clone(), &config);

    let mut registry = Registry::default();
    let api_metrics = ApiMetrics::register(&mut registry);
    if let Some(addr) = config.server.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            fs,
        };
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    spawn_refresh_log(&store);

    if secrets.api_key.is_none() {
        warn!("no API key configured: every endpoint is open");
    }
    let app = api::router(AppState {
        store,
        api_key: secrets.api_key.map(Arc::new),
        metrics: api_metrics,
    });

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    info!(addr = %config.server.listen, "api: listening");

    notify_ready(&config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server")?;

    info!("daemon stopped");
    Ok(())
}

/// Log refresh signals so map changes are visible without a watcher attached.
fn spawn_refresh_log(store: &MapStore) {
    let mut events = store.notifier().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(kind = event.event_type(), path = event.path(), "map refresh"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "refresh log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("installing ctrl-c handler: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn notify_ready(listen: &str) {
    // sd_notify when running under systemd; no-op otherwise
    let Ok(socket) = std::env::var("NOTIFY_SOCKET") else {
        return;
    };
    match send_ready(&socket, listen) {
        Ok(()) => debug!(notify_socket = %socket, "sent systemd READY=1"),
        Err(e) => warn!(notify_socket = %socket, "systemd notify failed: {e}"),
    }
}

fn send_ready(socket: &str, listen: &str) -> std::io::Result<()> {
    let message = format!("READY=1\nSTATUS=accepting map uploads on {listen}\n");
    let sock = std::os::unix::net::UnixDatagram::unbound()?;
    sock.send_to(message.as_bytes(), socket)?;
    Ok(())
}
