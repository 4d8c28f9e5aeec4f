//! Shared gRPC infrastructure: status mapping, trace propagation, health,
//! server construction and the repoauth client.

pub mod auth_client;
pub mod error;
pub mod health;
pub mod interceptors;
pub mod server;

pub mod proto {
    tonic::include_proto!("repoauth.v1");
}

pub use auth_client::{AuthClient, AuthClientConfig};
pub use error::{GrpcResult, IntoStatus};
pub use health::{create_health_service, HealthComponents, HealthReporter};
pub use interceptors::{
    extract_request_id, extract_traceparent, inject_trace_context,
    inject_trace_context_with_request_id, trace_context_interceptor, REQUEST_ID_KEY,
    TRACEPARENT_KEY,
};
pub use server::{create_reflection_service, GrpcServerBuilder, DEFAULT_MAX_IN_FLIGHT};

pub use tonic::{Code, Request, Response, Status};
