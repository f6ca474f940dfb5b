use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod adapters;
mod api;
mod config;
mod error;
mod i18n;
mod jobs;
mod service;
mod toolchain;

use crate::jobs::JobStore;
use crate::service::ConversionService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting docshift service v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(crate::config::load_service_config()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );

    // The job store lives for the whole process and is shared by reference
    let jobs = Arc::new(JobStore::new());
    let service = Arc::new(ConversionService::new(config.clone(), jobs)?);

    // Log which external tools were found; missing ones degrade /health
    service.log_tool_availability().await;

    let shutdown = CancellationToken::new();
    let cleanup = ConversionService::start_cleanup_worker(service.clone(), shutdown.clone());

    let app = api::router(service);

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                server_shutdown.cancelled().await;
            }
            info!("Shutdown requested");
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = cleanup.await {
        tracing::warn!(error = %e, "Cleanup worker ended abnormally");
    }

    info!("Service stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docshift_service=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}

#[cfg(all(test, unix))]
pub mod test_support {
    use std::path::{Path, PathBuf};

    /// Write an executable shell script standing in for an external tool
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
