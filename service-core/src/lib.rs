//! service-core: shared infrastructure for the repoauth services.
pub mod config;
pub mod error;
pub mod grpc;
pub mod observability;

pub use tonic;
pub use tracing;
