use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use slotguard::config::Config;
use slotguard::directory::InMemoryDirectory;
use slotguard::engine::Engine;
use slotguard::store::LedgerStore;
use slotguard::{compactor, wire};

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    slotguard::observability::init(config.metrics_port);

    let directory = match &config.directory {
        Some(path) => InMemoryDirectory::load(path)?,
        None => {
            tracing::warn!("SLOTGUARD_DIRECTORY not set, starting with an empty directory");
            InMemoryDirectory::new()
        }
    };

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(LedgerStore::open(&LedgerStore::wal_path_in(&config.data_dir))?);

    info!(
        "directory: {} staff, {} services; ledger: {} bookings",
        directory.staff_count(),
        directory.service_count(),
        store.booking_count()
    );

    let engine = Arc::new(Engine::new(
        Arc::new(directory),
        store.clone(),
        config.booking_timeout,
    ));
    tokio::spawn(compactor::run_compactor(
        store,
        engine.clone(),
        config.compact_threshold,
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotguard listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  booking_timeout: {:?}", config.booking_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    wire::serve(listener, engine, config.max_connections, shutdown_signal()).await;

    info!("slotguard stopped");
    Ok(())
}
