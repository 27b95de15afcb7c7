use anyhow::Context;
use dispatch_server::app::{self, Dispatcher, IngestShutdownError, IngestTask};
use dispatch_server::config::ServiceConfig;
use dispatch_server::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    logging::init(&config.log).map_err(|err| anyhow::anyhow!(err))?;

    let Dispatcher {
        state,
        ingestor,
        locations,
    } = Dispatcher::build(&config)?;

    let ingest = IngestTask::spawn(ingestor, locations);

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "dispatch server listening");

    axum::serve(listener, app::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    match ingest.finish(config.shutdown_timeout).await {
        Ok(()) => tracing::info!("location ingestion drained"),
        Err(err @ IngestShutdownError::TimedOut(_)) => tracing::warn!(error = %err, "shutdown incomplete"),
        Err(err) => tracing::error!(error = %err, "shutdown incomplete"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
