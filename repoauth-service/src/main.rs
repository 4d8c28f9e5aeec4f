//! Repoauth Service entry point.

use repoauth_service::config::RepoAuthConfig;
use repoauth_service::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

fn main() -> std::io::Result<()> {
    let config = RepoAuthConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    // The worker count bounds how many requests make progress at once.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads)
        .thread_name("repoauth-worker")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: RepoAuthConfig) -> std::io::Result<()> {
    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(|e| {
        eprintln!("Failed to initialize tracing: {}", e);
        std::io::Error::other(format!("Tracing error: {}", e))
    })?;

    tracing::info!(
        version = %config.service_version,
        otlp_endpoint = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        "Starting repoauth-service"
    );

    // Log configuration (database URL omitted, it may carry credentials)
    tracing::info!(
        service_name = %config.service_name,
        http_port = %config.common.port,
        grpc_port = %config.common.grpc_port,
        store = config.store.as_str(),
        db_max_connections = %config.database.max_connections,
        db_min_connections = %config.database.min_connections,
        worker_threads = %config.server.worker_threads,
        max_in_flight = %config.server.max_in_flight,
        shutdown_drain_seconds = %config.server.shutdown_drain_seconds,
        grpc_reflection = config.server.reflection,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;

    if let Err(e) = app.run_until_stopped(shutdown_signal()).await {
        tracing::error!(error = %e, "Application error");
        return Err(e);
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
