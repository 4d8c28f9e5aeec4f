//! Credential verification.
//!
//! Every `false` answer costs one Argon2 verification: when there is no
//! usable stored hash (unknown nickname, provider-only account, corrupt
//! hash) the password is checked against a decoy hash instead, so callers
//! cannot tell those cases apart from a wrong password.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::error::{require_non_empty, ServiceError};
use super::store::IdentityReader;
use crate::utils::{hash_password, is_well_formed, verify_password, Password, PasswordHashString};

const DECOY_PASSWORD: &str = "repoauth-decoy-password";

pub struct CredentialVerifier {
    store: Arc<dyn IdentityReader>,
    decoy: PasswordHashString,
}

impl CredentialVerifier {
    /// Build a verifier. Hashes the decoy once, with the same parameters
    /// used for stored hashes.
    pub fn new(store: Arc<dyn IdentityReader>) -> Result<Self, ServiceError> {
        let decoy = hash_password(&Password::new(DECOY_PASSWORD.to_string()))
            .map_err(ServiceError::Internal)?;
        Ok(Self { store, decoy })
    }

    /// `true` iff an account named `username` exists and `password` matches
    /// its stored hash.
    #[instrument(skip(self, password))]
    pub async fn check_credentials(
        &self,
        username: &str,
        password: Password,
    ) -> Result<bool, ServiceError> {
        require_non_empty("username", username)?;
        require_non_empty("password", password.as_str())?;

        let account = self.store.find_account_by_nickname(username).await?;

        let (stored, known) = match account {
            Some(account) if is_well_formed(&account.password_hash) => {
                (PasswordHashString::new(account.password_hash), true)
            }
            Some(account) => {
                if account.has_password() {
                    warn!(account_id = account.id, "Stored password hash is malformed");
                }
                (self.decoy.clone(), false)
            }
            None => (self.decoy.clone(), false),
        };

        let matched =
            tokio::task::spawn_blocking(move || verify_password(&password, &stored).is_ok())
                .await
                .map_err(|e| {
                    ServiceError::Internal(anyhow::anyhow!("password verification task failed: {}", e))
                })?;

        let valid = known && matched;
        debug!(valid, "Credential check completed");
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountKind, FacebookLink, NewAccount};
    use crate::services::memory::MemoryStore;
    use crate::services::store::IdentityWriter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    async fn fixture() -> (Arc<MemoryStore>, CredentialVerifier) {
        let store = Arc::new(MemoryStore::new());
        let mut rng = StdRng::seed_from_u64(42);

        let hash = hash_password(&Password::new("s3cret".to_string())).unwrap();
        store
            .insert_account(
                NewAccount::build("alice", AccountKind::Developer, &mut rng).with_password_hash(hash),
            )
            .await
            .unwrap();

        let link = FacebookLink {
            facebook_id: 1001,
            access_token: "fb-token".to_string(),
        };
        store
            .insert_account(NewAccount::build("fbuser", AccountKind::Facebook(link), &mut rng))
            .await
            .unwrap();

        store
            .insert_account(
                NewAccount::build("legacy", AccountKind::Password, &mut rng)
                    .with_password_hash(PasswordHashString::new("not-a-phc-string".to_string())),
            )
            .await
            .unwrap();

        let verifier = CredentialVerifier::new(store.clone()).unwrap();
        (store, verifier)
    }

    fn pw(s: &str) -> Password {
        Password::new(s.to_string())
    }

    #[tokio::test]
    async fn matching_password_is_valid() {
        let (_, verifier) = fixture().await;
        assert!(verifier.check_credentials("alice", pw("s3cret")).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid() {
        let (_, verifier) = fixture().await;
        assert!(!verifier.check_credentials("alice", pw("wrong")).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_is_invalid() {
        let (_, verifier) = fixture().await;
        assert!(!verifier.check_credentials("nobody", pw("s3cret")).await.unwrap());
    }

    #[tokio::test]
    async fn decoy_password_never_authenticates() {
        let (_, verifier) = fixture().await;
        assert!(!verifier
            .check_credentials("nobody", pw(DECOY_PASSWORD))
            .await
            .unwrap());
        assert!(!verifier
            .check_credentials("fbuser", pw(DECOY_PASSWORD))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn provider_only_and_malformed_accounts_are_invalid() {
        let (_, verifier) = fixture().await;
        assert!(!verifier.check_credentials("fbuser", pw("anything")).await.unwrap());
        assert!(!verifier
            .check_credentials("legacy", pw("not-a-phc-string"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn empty_inputs_are_invalid_arguments() {
        let (_, verifier) = fixture().await;
        assert!(matches!(
            verifier.check_credentials("", pw("s3cret")).await,
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            verifier.check_credentials("alice", pw("")).await,
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_is_not_false() {
        let (store, verifier) = fixture().await;
        store.set_available(false);

        assert!(matches!(
            verifier.check_credentials("alice", pw("s3cret")).await,
            Err(ServiceError::PersistenceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn repeated_checks_agree() {
        let (_, verifier) = fixture().await;
        let first = verifier.check_credentials("alice", pw("s3cret")).await.unwrap();
        let second = verifier.check_credentials("alice", pw("s3cret")).await.unwrap();
        assert_eq!(first, second);
    }
}
