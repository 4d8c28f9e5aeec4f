//! AuthService gRPC implementation.
//!
//! Thin mapping between the wire messages and the decision procedures.
//! A `false` answer is only ever a completed decision; every failure leaves
//! as a non-OK status.

use service_core::error::AppError;
use service_core::grpc::{GrpcResult, IntoStatus};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

use crate::grpc::drain::DrainGuard;
use crate::grpc::proto::{
    auth_service_server::AuthService, CanAccessRepoRequest, CanAccessRepoResponse,
    CheckCredentialsRequest, CheckCredentialsResponse,
};
use crate::services::metrics::{GRPC_REQUESTS_TOTAL, GRPC_REQUEST_DURATION};
use crate::services::{AccessAuthorizer, CredentialVerifier, ServiceError};
use crate::utils::Password;

pub struct AuthServiceImpl {
    verifier: Arc<CredentialVerifier>,
    authorizer: Arc<AccessAuthorizer>,
    drain: DrainGuard,
}

impl AuthServiceImpl {
    pub fn new(
        verifier: Arc<CredentialVerifier>,
        authorizer: Arc<AccessAuthorizer>,
        drain: DrainGuard,
    ) -> Self {
        Self {
            verifier,
            authorizer,
            drain,
        }
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    #[instrument(skip(self, request), fields(method = "CheckCredentials"))]
    async fn check_credentials(
        &self,
        request: Request<CheckCredentialsRequest>,
    ) -> GrpcResult<CheckCredentialsResponse> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["CheckCredentials"])
            .start_timer();

        let req = request.into_inner();
        let result = self
            .drain
            .run(
                self.verifier
                    .check_credentials(&req.username, Password::new(req.password)),
            )
            .await
            .unwrap_or(Err(ServiceError::ShuttingDown));

        timer.observe_duration();

        let valid = finish("CheckCredentials", result)?;
        Ok(Response::new(CheckCredentialsResponse { valid }))
    }

    #[instrument(skip(self, request), fields(method = "CanAccessRepo"))]
    async fn can_access_repo(
        &self,
        request: Request<CanAccessRepoRequest>,
    ) -> GrpcResult<CanAccessRepoResponse> {
        let timer = GRPC_REQUEST_DURATION
            .with_label_values(&["CanAccessRepo"])
            .start_timer();

        let req = request.into_inner();
        let result = self
            .drain
            .run(self.authorizer.can_access_repo(&req.username, &req.repo_domain))
            .await
            .unwrap_or(Err(ServiceError::ShuttingDown));

        timer.observe_duration();

        let allowed = finish("CanAccessRepo", result)?;
        Ok(Response::new(CanAccessRepoResponse { allowed }))
    }
}

/// Count the outcome and turn failures into a status.
fn finish(method: &str, result: Result<bool, ServiceError>) -> Result<bool, Status> {
    let outcome = match &result {
        Ok(true) => "true",
        Ok(false) => "false",
        Err(e) => e.outcome(),
    };
    GRPC_REQUESTS_TOTAL
        .with_label_values(&[method, outcome])
        .inc();

    result.map_err(|e| AppError::from(e).into_status())
}
