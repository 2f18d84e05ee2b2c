use anyhow::Result;
use metron_agent::config::AgentConfig;
use metron_agent::delivery::{DeliveryLoop, DeliverySettings};
use metron_agent::transport::HttpTransport;
use metron_collector::Sampler;
use metron_common::snapshot::Snapshot;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("metron_agent=info".parse()?)
                .add_directive("metron_common=info".parse()?)
                .add_directive("metron_collector=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let config = AgentConfig::load(&config_path)?;
    let transport = HttpTransport::new(&config.server_endpoint, config.request_timeout())?;
    tracing::info!(
        server = %transport.url(),
        poll_interval_secs = config.poll_interval_secs,
        report_interval_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        "metron-agent starting"
    );

    let delivery = Arc::new(DeliveryLoop::new(
        Arc::new(Snapshot::new()),
        Arc::new(transport),
        DeliverySettings::from(&config),
    ));
    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();

    let mut running = tokio::spawn({
        let delivery = delivery.clone();
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        async move {
            delivery
                .run(Sampler::with_host_collectors(), shutdown, abort)
                .await
        }
    });

    tokio::select! {
        result = &mut running => return result?,
        _ = shutdown_signal() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    shutdown.cancel();
    let grace = config.shutdown_grace();
    let abort_timer = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!(grace_secs = grace.as_secs(), "Grace period elapsed, abandoning retries");
        abort.cancel();
    });

    let result = running.await?;
    abort_timer.abort();
    tracing::info!("metron-agent stopped");
    result
}
