//! Standard gRPC health service.
//!
//! Status is published for the server as a whole (the empty service name)
//! and for one fully qualified service, and both flip together when the
//! server starts draining.

use tonic_health::pb::health_server::{Health, HealthServer};
use tonic_health::server::HealthReporter as TonicHealthReporter;
use tonic_health::ServingStatus;

/// Handle for flipping the advertised status.
#[derive(Clone)]
pub struct HealthReporter {
    inner: TonicHealthReporter,
    service_name: String,
}

impl HealthReporter {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn set_serving(&self) {
        self.publish(ServingStatus::Serving).await;
    }

    pub async fn set_not_serving(&self) {
        self.publish(ServingStatus::NotServing).await;
    }

    async fn publish(&self, status: ServingStatus) {
        // Clones share the same status map.
        let mut reporter = self.inner.clone();
        reporter.set_service_status("", status).await;
        reporter
            .set_service_status(&self.service_name, status)
            .await;
        tracing::debug!(service = %self.service_name, ?status, "Health status updated");
    }
}

/// Health server plus the reporter that controls it.
pub struct HealthComponents<S> {
    pub server: HealthServer<S>,
    pub reporter: HealthReporter,
}

/// Create a health service that starts out `SERVING`.
///
/// `service_name` should be the fully qualified gRPC service name, e.g.
/// `repoauth.v1.AuthService`, so that standard health checkers can query it.
pub async fn create_health_service(
    service_name: impl Into<String>,
) -> HealthComponents<impl Health> {
    let (inner, server) = tonic_health::server::health_reporter();
    let reporter = HealthReporter {
        inner,
        service_name: service_name.into(),
    };
    reporter.set_serving().await;

    HealthComponents { server, reporter }
}
