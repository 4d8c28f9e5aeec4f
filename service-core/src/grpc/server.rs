//! gRPC server builder utilities.
//!
//! Every server built here carries a global in-flight bound on top of the
//! per-connection one, so a burst of callers queues instead of spawning
//! unbounded work.

use std::time::Duration;

use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tower::layer::util::{Identity, Stack};
use tower::limit::GlobalConcurrencyLimitLayer;

/// Default number of requests allowed in flight across all connections.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Builder for configuring a gRPC server with standard middleware.
pub struct GrpcServerBuilder {
    service_name: String,
    enable_reflection: bool,
    http2_keepalive_interval: Option<Duration>,
    http2_keepalive_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    concurrency_limit_per_connection: usize,
    max_in_flight: usize,
}

impl GrpcServerBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            enable_reflection: true,
            http2_keepalive_interval: Some(Duration::from_secs(30)),
            http2_keepalive_timeout: Some(Duration::from_secs(10)),
            request_timeout: None,
            concurrency_limit_per_connection: 1,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Enable or disable gRPC reflection (enabled by default).
    pub fn with_reflection(mut self, enable: bool) -> Self {
        self.enable_reflection = enable;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.http2_keepalive_interval = Some(interval);
        self
    }

    pub fn with_keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.http2_keepalive_timeout = Some(timeout);
        self
    }

    /// Fail a request with `CANCELLED` once it has run for `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Requests served concurrently on a single connection (default 1).
    pub fn with_concurrency_limit_per_connection(mut self, limit: usize) -> Self {
        self.concurrency_limit_per_connection = limit.max(1);
        self
    }

    /// Requests served concurrently across all connections.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn reflection_enabled(&self) -> bool {
        self.enable_reflection
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn concurrency_limit_per_connection(&self) -> usize {
        self.concurrency_limit_per_connection
    }

    /// Build a tonic Server with the configured settings.
    ///
    /// Reflection is not added here; callers check [`Self::reflection_enabled`]
    /// and pass the result of [`create_reflection_service`] to
    /// `add_optional_service`.
    pub fn build_server(&self) -> Server<Stack<GlobalConcurrencyLimitLayer, Identity>> {
        tracing::info!(
            service = %self.service_name,
            reflection = self.enable_reflection,
            max_in_flight = self.max_in_flight,
            concurrency_limit_per_connection = self.concurrency_limit_per_connection,
            "Building gRPC server"
        );

        let mut server = Server::builder()
            .concurrency_limit_per_connection(self.concurrency_limit_per_connection);

        if let Some(interval) = self.http2_keepalive_interval {
            server = server.http2_keepalive_interval(Some(interval));
        }

        if let Some(timeout) = self.http2_keepalive_timeout {
            server = server.http2_keepalive_timeout(Some(timeout));
        }

        if let Some(timeout) = self.request_timeout {
            server = server.timeout(timeout);
        }

        server.layer(GlobalConcurrencyLimitLayer::new(self.max_in_flight))
    }
}

/// Create a reflection service from encoded file descriptor sets.
pub fn create_reflection_service(
    file_descriptor_sets: &[&[u8]],
) -> Result<
    tonic_reflection::server::ServerReflectionServer<
        impl tonic_reflection::server::ServerReflection,
    >,
    tonic_reflection::server::Error,
> {
    let mut builder = ReflectionBuilder::configure();

    for fds in file_descriptor_sets {
        builder = builder.register_encoded_file_descriptor_set(fds);
    }

    builder.build_v1()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = GrpcServerBuilder::new("repoauth.v1.AuthService");
        assert!(builder.reflection_enabled());
        assert_eq!(builder.concurrency_limit_per_connection(), 1);
        assert_eq!(builder.max_in_flight(), DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    fn limits_are_never_zero() {
        let builder = GrpcServerBuilder::new("repoauth.v1.AuthService")
            .with_reflection(false)
            .with_max_in_flight(0)
            .with_concurrency_limit_per_connection(0);

        assert!(!builder.reflection_enabled());
        assert_eq!(builder.max_in_flight(), 1);
        assert_eq!(builder.concurrency_limit_per_connection(), 1);
    }
}
