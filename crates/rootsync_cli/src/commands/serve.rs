//! Serve command implementation.

use rootsync_server::{ServerConfig, SyncServer};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Runs the server until Ctrl-C.
///
/// Only the administrative HTTP API is served. Sync transactions need a
/// transport that carries them; a process embedding [`SyncServer`] hands
/// each client connection to [`SyncServer::accept`]. This command opens no
/// such listener, so clients cannot sync against it.
pub fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let bind = config.bind_addr;
        if config.data_dir.is_none() {
            warn!("no store directory given, data is kept in memory only");
        }
        let server = SyncServer::open(config)?;
        let listener = TcpListener::bind(bind).await?;
        server.serve_admin(listener, shutdown_signal()).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
