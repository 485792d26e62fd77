//! TCP server: accepts clients, runs active expiry, and shuts down
//! gracefully on SIGINT/SIGTERM.
//!
//! On shutdown the listener stops, every client is told to disconnect
//! (blocked ones included), the handlers are drained, and a final
//! snapshot is written when persistence is configured.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mimic_core::KeyspaceSet;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::config::MimicConfig;
use crate::connection;

/// How long shutdown waits for connection handlers to exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared by every connection.
pub struct ServerContext {
    pub spaces: Arc<KeyspaceSet>,
    pub clients: Arc<ClientRegistry>,
    /// Where SAVE writes. `None` disables persistence.
    pub snapshot_dir: Option<PathBuf>,
}

/// Loads the snapshot (if any), binds, and runs until a shutdown signal.
pub async fn run(cfg: MimicConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = cfg.socket_addr()?;
    let spaces = Arc::new(KeyspaceSet::new(cfg.keyspace_config()));

    if let Some(dir) = cfg.snapshot_dir() {
        std::fs::create_dir_all(dir)?;
        let loaded = spaces.load(dir)?;
        info!(dir = %dir.display(), keys = loaded, "snapshot loaded");
    }

    let ctx = Arc::new(ServerContext {
        spaces: Arc::clone(&spaces),
        clients: Arc::new(ClientRegistry::new()),
        snapshot_dir: cfg.dir.clone(),
    });

    let listener = TcpListener::bind(addr).await?;
    let max_conn = cfg.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_conn));

    info!(
        "listening on {addr} with {} databases (max {max_conn} connections)",
        spaces.len()
    );

    let expiry = tokio::spawn(expiry_loop(Arc::clone(&spaces), cfg.expiry_interval()));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received, draining connections...");
                break;
            }

            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, dropping connection from {peer}");
                        drop(stream);
                        continue;
                    }
                };

                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = connection::handle(stream, ctx).await {
                        error!("connection error from {peer}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    expiry.abort();

    let killed = ctx.clients.kill_all();
    debug!(clients = killed, "disconnecting clients");
    match tokio::time::timeout(DRAIN_TIMEOUT, semaphore.acquire_many(max_conn as u32)).await {
        Ok(_) => info!("all connections drained"),
        Err(_) => warn!("timed out waiting for connections to close"),
    }

    if cfg.saves_on_shutdown() {
        if let Some(dir) = cfg.snapshot_dir() {
            let saved = spaces.save(dir)?;
            info!(dir = %dir.display(), keys = saved, "shutdown snapshot written");
        }
    }

    info!("shutting down");
    Ok(())
}

/// Runs one active expiry cycle over every database per tick.
async fn expiry_loop(spaces: Arc<KeyspaceSet>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let removed = spaces.run_expiration();
        if removed > 0 {
            debug!(removed, "active expiry cycle");
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
