//! Client for the repoauth gRPC surface.
//!
//! Used by callers that gate repository operations on the two queries, and
//! by this workspace's integration tests.

use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

use super::interceptors::inject_trace_context_with_request_id;
use super::proto::auth_service_client::AuthServiceClient;
use super::proto::{CanAccessRepoRequest, CheckCredentialsRequest};

/// Configuration for the auth service client.
#[derive(Clone, Debug)]
pub struct AuthClientConfig {
    /// The gRPC endpoint of the auth service (e.g., "http://repoauth:7911").
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for AuthClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:7911".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct AuthClient {
    inner: AuthServiceClient<Channel>,
}

impl AuthClient {
    pub async fn new(config: AuthClientConfig) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(config.endpoint)?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .connect()
            .await?;

        Ok(Self {
            inner: AuthServiceClient::new(channel),
        })
    }

    pub async fn connect(endpoint: &str) -> Result<Self, tonic::transport::Error> {
        Self::new(AuthClientConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        })
        .await
    }

    /// Ask whether `password` is the password of the account named `username`.
    pub async fn check_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<bool, tonic::Status> {
        let request = traced(CheckCredentialsRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let response = self.inner.check_credentials(request).await?;
        Ok(response.into_inner().valid)
    }

    /// Ask whether `username` owns an application registered for `repo_domain`.
    pub async fn can_access_repo(
        &mut self,
        username: &str,
        repo_domain: &str,
    ) -> Result<bool, tonic::Status> {
        let request = traced(CanAccessRepoRequest {
            username: username.to_string(),
            repo_domain: repo_domain.to_string(),
        });
        let response = self.inner.can_access_repo(request).await?;
        Ok(response.into_inner().allowed)
    }
}

fn traced<T>(message: T) -> Request<T> {
    let mut request = Request::new(message);
    inject_trace_context_with_request_id(&mut request, &uuid::Uuid::new_v4().to_string());
    request
}
