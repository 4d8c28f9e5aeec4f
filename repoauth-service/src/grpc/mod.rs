//! gRPC module for repoauth-service.

mod auth_service;
mod drain;

pub use auth_service::AuthServiceImpl;
pub use drain::DrainGuard;

/// Fully qualified name advertised by the health service.
pub const AUTH_SERVICE_NAME: &str = "repoauth.v1.AuthService";

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("repoauth.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("repoauth_descriptor");
}
