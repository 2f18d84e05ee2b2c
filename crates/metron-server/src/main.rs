use anyhow::{Context, Result};
use metron_server::app;
use metron_server::backend::Backend;
use metron_server::config::ServerConfig;
use metron_server::state::AppState;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("metron_server=info".parse()?)
                .add_directive("metron_storage=info".parse()?),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config/server.toml".to_string());
    let config = ServerConfig::load(&config_path)?;

    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();

    let backend = Backend::select(&config);
    let store = backend.open(abort.clone())?;
    store
        .init(shutdown.clone())
        .await
        .with_context(|| format!("Failed to initialize {} store", backend.name()))?;

    let state = AppState::new(store.clone(), backend.name());
    let http_app = app::build_http_app(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, backend = backend.name(), "Collector listening");

    let served = axum::serve(listener, http_app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, draining connections");
                shutdown.cancel();
            }
        })
        .await;

    shutdown.cancel();
    let grace = config.shutdown_grace();
    let abort_timer = tokio::spawn({
        let abort = abort.clone();
        async move {
            tokio::time::sleep(grace).await;
            tracing::warn!(?grace, "Shutdown grace period elapsed, aborting retries");
            abort.cancel();
        }
    });

    let closed = store.close().await;
    abort_timer.abort();
    if let Err(e) = &closed {
        tracing::error!(error = %e, "Failed to close store");
    }
    served?;
    closed?;
    tracing::info!("Collector stopped");
    Ok(())
}
