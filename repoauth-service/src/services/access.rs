//! Repository access decisions.

use std::sync::Arc;
use tracing::{debug, instrument};

use super::error::{require_non_empty, ServiceError};
use super::store::IdentityReader;

/// Ownership-only authorization: a user may access a repository iff they
/// author an application bound to its domain. Access grants are not
/// consulted.
pub struct AccessAuthorizer {
    store: Arc<dyn IdentityReader>,
}

impl AccessAuthorizer {
    pub fn new(store: Arc<dyn IdentityReader>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn can_access_repo(
        &self,
        username: &str,
        repo_domain: &str,
    ) -> Result<bool, ServiceError> {
        require_non_empty("username", username)?;
        require_non_empty("repo_domain", repo_domain)?;

        let application = self
            .store
            .find_application_by_author_and_domain(username, repo_domain)
            .await?;

        let allowed = application.is_some();
        debug!(allowed, "Access decision completed");
        Ok(allowed)
    }
}
