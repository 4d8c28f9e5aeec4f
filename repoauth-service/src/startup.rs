//! Application startup and lifecycle management.

use crate::config::{RepoAuthConfig, StoreBackend};
use crate::grpc::{
    proto::{auth_service_server::AuthServiceServer, FILE_DESCRIPTOR_SET},
    AuthServiceImpl, DrainGuard, AUTH_SERVICE_NAME,
};
use crate::services::metrics::{get_metrics, init_metrics};
use crate::services::{
    AccessAuthorizer, CredentialVerifier, Database, IdentityReader, MemoryStore,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use service_core::error::AppError;
use service_core::grpc::{
    create_health_service, create_reflection_service, trace_context_interceptor,
    GrpcServerBuilder,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tower_http::trace::{DefaultOnResponse, MakeSpan, TraceLayer};
use tracing::{Level, Span};

/// Lifecycle of the RPC listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
    /// Shutdown requested; no new connections, in-flight requests finishing.
    Draining,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: RepoAuthConfig,
    pub store: Arc<dyn IdentityReader>,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn IdentityReader>,
    service_name: String,
    service_version: String,
    server_state: watch::Receiver<ServerState>,
}

/// Liveness: the process is up and answering HTTP.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version
        })),
    )
}

/// Readiness: listening and the store answers.
async fn readiness_check(State(state): State<HealthState>) -> Result<StatusCode, AppError> {
    let server_state = *state.server_state.borrow();
    if server_state != ServerState::Listening {
        tracing::debug!(?server_state, "Readiness check failed - not listening");
        return Err(AppError::Unavailable(anyhow::anyhow!(
            "server is {:?}",
            server_state
        )));
    }

    state
        .store
        .health_check()
        .await
        .map_err(|e| AppError::Unavailable(anyhow::Error::new(e)))?;

    Ok(StatusCode::OK)
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Span for each gRPC call, with a `request_id` slot the interceptor fills.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcMakeSpan;

impl<B> MakeSpan<B> for GrpcMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> Span {
        tracing::info_span!(
            "grpc_request",
            method = %request.uri().path(),
            request_id = tracing::field::Empty,
        )
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    state: AppState,
    server_state: Arc<watch::Sender<ServerState>>,
}

impl Application {
    /// Connect the configured store and bind both listeners.
    pub async fn build(config: RepoAuthConfig) -> Result<Self, AppError> {
        let store: Arc<dyn IdentityReader> = match config.store {
            StoreBackend::Postgres => {
                let db = Database::connect(&config.database).await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    AppError::from(e)
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    AppError::from(e)
                })?;
                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory store; identities are lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Bind both listeners in front of an already constructed store.
    pub async fn build_with_store(
        config: RepoAuthConfig,
        store: Arc<dyn IdentityReader>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = config.common.http_addr();
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        let grpc_addr = config.common.grpc_addr();
        let grpc_listener = TcpListener::bind(grpc_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %grpc_addr, "Failed to bind gRPC listener");
            AppError::from(e)
        })?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Repoauth service listeners bound"
        );

        let (server_state, _) = watch::channel(ServerState::Stopped);

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            state: AppState { config, store },
            server_state: Arc::new(server_state),
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    /// Observe lifecycle transitions.
    pub fn server_state(&self) -> watch::Receiver<ServerState> {
        self.server_state.subscribe()
    }

    /// Serve until `shutdown` resolves, then drain.
    ///
    /// On shutdown the health service reports `NOT_SERVING`, the gRPC
    /// listener stops accepting, and in-flight requests get at most
    /// `shutdown_drain_seconds` to finish. Requests still running at the
    /// deadline are cancelled and answer `UNAVAILABLE`. The state becomes
    /// `Stopped` only once no handler is running.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = self.state.config.clone();
        let store = self.state.store.clone();
        let drain_timeout = Duration::from_secs(config.server.shutdown_drain_seconds);

        let health_state = HealthState {
            store: store.clone(),
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            server_state: self.server_state.subscribe(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        let verifier = CredentialVerifier::new(store.clone()).map_err(|e| {
            std::io::Error::other(format!("Failed to build credential verifier: {}", e))
        })?;
        let drain = DrainGuard::new();
        let auth_service = AuthServiceImpl::new(
            Arc::new(verifier),
            Arc::new(AccessAuthorizer::new(store)),
            drain.clone(),
        );

        let health = create_health_service(AUTH_SERVICE_NAME).await;
        let reporter = health.reporter.clone();

        let builder = GrpcServerBuilder::new(AUTH_SERVICE_NAME)
            .with_max_in_flight(config.server.max_in_flight)
            .with_reflection(config.server.reflection);

        let reflection_service = if builder.reflection_enabled() {
            let service = create_reflection_service(&[FILE_DESCRIPTOR_SET]).map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;
            Some(service)
        } else {
            None
        };

        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(GrpcMakeSpan)
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        // Fires once shutdown has been requested so the drain timer can start.
        let (draining_tx, draining_rx) = oneshot::channel::<()>();
        let signal_state = self.server_state.clone();
        let grpc_shutdown = async move {
            shutdown.await;
            signal_state.send_replace(ServerState::Draining);
            reporter.set_not_serving().await;
            tracing::info!("Shutdown requested, draining in-flight requests");
            let _ = draining_tx.send(());
        };

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = builder
            .build_server()
            .layer(grpc_trace_layer)
            .add_service(health.server)
            .add_optional_service(reflection_service)
            .add_service(AuthServiceServer::with_interceptor(
                auth_service,
                trace_context_interceptor,
            ))
            .serve_with_incoming_shutdown(incoming, grpc_shutdown);

        let drain_deadline = async move {
            match draining_rx.await {
                Ok(()) => tokio::time::sleep(drain_timeout).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        self.server_state.send_replace(ServerState::Listening);

        let mut http_state = self.server_state.subscribe();
        let http_server = axum::serve(self.http_listener, http_router)
            .with_graceful_shutdown(async move { wait_until_stopped(&mut http_state).await });
        let http_task = tokio::spawn(async move {
            if let Err(e) = http_server.await {
                tracing::error!(error = %e, "HTTP server error");
            }
        });

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            max_in_flight = config.server.max_in_flight,
            "Service ready to accept connections"
        );

        let result = tokio::select! {
            result = grpc_server => result.map_err(|e| {
                tracing::error!(error = %e, "gRPC server error");
                std::io::Error::other(format!("gRPC server error: {}", e))
            }),
            _ = drain_deadline => {
                tracing::warn!(
                    drain_seconds = drain_timeout.as_secs(),
                    in_flight = drain.in_flight(),
                    "Drain timeout elapsed, cancelling in-flight requests"
                );
                Ok(())
            }
        };

        // Nothing may outlive the server.
        drain.abandon();
        drain.wait_idle().await;
        self.server_state.send_replace(ServerState::Stopped);

        if tokio::time::timeout(drain_timeout, http_task).await.is_err() {
            tracing::warn!("HTTP server did not stop within the drain timeout");
        }

        tracing::info!("Service stopped");
        result
    }
}

/// The HTTP side keeps answering (with `/ready` at 503) until the RPC side
/// has fully stopped.
async fn wait_until_stopped(rx: &mut watch::Receiver<ServerState>) {
    while *rx.borrow_and_update() != ServerState::Stopped {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_spans_declare_request_id() {
        let request = axum::http::Request::builder()
            .uri("/repoauth.v1.AuthService/CheckCredentials")
            .body(())
            .unwrap();

        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = GrpcMakeSpan.make_span(&request);
            assert!(span.field("request_id").is_some());
            assert!(span.field("method").is_some());
        });
    }
}
