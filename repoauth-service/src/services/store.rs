//! Persistence gateway contract.
//!
//! [`IdentityReader`] is everything the decision procedures need.
//! [`IdentityWriter`] is the provisioning surface used by operator tooling
//! and tests. Both are implemented by the PostgreSQL [`Database`] and the
//! in-process [`MemoryStore`].
//!
//! [`Database`]: crate::services::Database
//! [`MemoryStore`]: crate::services::MemoryStore

use async_trait::async_trait;
use service_core::error::AppError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::models::{
    AccessGrant, Account, AccountId, Application, DeveloperKey, NewAccessGrant, NewAccount,
    NewApplication, NewDeveloperKey,
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity, timeout or pool exhaustion. Retryable by the caller.
    #[error("store unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("duplicate {field}")]
    Duplicate { field: &'static str },

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("record not found")]
    NotFound,

    #[error("store error: {0}")]
    Internal(anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => AppError::Unavailable(e),
            StoreError::Duplicate { field } => {
                AppError::Conflict(anyhow::anyhow!("{} already exists", field))
            }
            StoreError::Constraint(message) => AppError::BadRequest(anyhow::anyhow!(message)),
            StoreError::Invalid(errors) => AppError::BadRequest(anyhow::Error::new(errors)),
            StoreError::NotFound => AppError::NotFound(anyhow::anyhow!("record not found")),
            StoreError::Internal(e) => AppError::DatabaseError(e),
        }
    }
}

/// Read-only lookups. Each call runs in its own read-only transaction.
#[async_trait]
pub trait IdentityReader: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    async fn find_account_by_nickname(&self, nickname: &str)
        -> Result<Option<Account>, StoreError>;

    async fn find_account_by_nickname_and_password_hash(
        &self,
        nickname: &str,
        password_hash: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Application authored by the account named `author_nickname` for
    /// `domain`. Duplicates resolve to the lowest application id.
    async fn find_application_by_author_and_domain(
        &self,
        author_nickname: &str,
        domain: &str,
    ) -> Result<Option<Application>, StoreError>;
}

/// Provisioning operations. Records are validated before they are written.
#[async_trait]
pub trait IdentityWriter: IdentityReader {
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn find_account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Removes the account together with its variant row, authored
    /// applications, grants and keys.
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError>;

    /// Fails with `Constraint` unless the author is a developer account.
    async fn insert_application(
        &self,
        application: NewApplication,
    ) -> Result<Application, StoreError>;

    async fn find_application_by_id(&self, id: i64) -> Result<Option<Application>, StoreError>;

    async fn delete_application(&self, id: i64) -> Result<(), StoreError>;

    /// Applications owned by `author_id`, oldest first.
    async fn list_applications_by_author(
        &self,
        author_id: AccountId,
    ) -> Result<Vec<Application>, StoreError>;

    async fn insert_access_grant(&self, grant: NewAccessGrant)
        -> Result<AccessGrant, StoreError>;

    async fn find_access_grant_by_token(
        &self,
        grant_token: &str,
    ) -> Result<Option<AccessGrant>, StoreError>;

    async fn delete_access_grant(&self, id: i64) -> Result<(), StoreError>;

    async fn insert_developer_key(&self, key: NewDeveloperKey)
        -> Result<DeveloperKey, StoreError>;

    async fn find_developer_key_by_fingerprint(
        &self,
        key_fingerprint: &str,
    ) -> Result<Option<DeveloperKey>, StoreError>;

    async fn list_developer_keys(
        &self,
        developer_id: AccountId,
    ) -> Result<Vec<DeveloperKey>, StoreError>;
}

/// Classify a sqlx failure.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate {
                field: duplicate_field(db_err.constraint()),
            };
        }
        if db_err.is_foreign_key_violation() || db_err.is_check_violation() {
            return StoreError::Constraint(db_err.message().to_string());
        }
    }

    if is_connectivity_error(&err) {
        StoreError::Unavailable(anyhow::Error::new(err))
    } else if matches!(err, sqlx::Error::RowNotFound) {
        StoreError::NotFound
    } else {
        StoreError::Internal(anyhow::Error::new(err))
    }
}

fn is_connectivity_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        // 08: connection exception, 53: insufficient resources,
        // 57: operator intervention (admin shutdown, query canceled).
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| {
                code.starts_with("08") || code.starts_with("53") || code.starts_with("57")
            })
            .unwrap_or(false),
        _ => false,
    }
}

fn duplicate_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("accounts_nickname_unique") => "nickname",
        Some("accounts_email_unique") => "email",
        Some("accounts_auth_token_unique") => "auth_token",
        Some("twitter_accounts_twitter_id_unique") => "twitter_id",
        Some("twitter_accounts_twitter_name_unique") => "twitter_name",
        Some("facebook_accounts_facebook_id_unique") => "facebook_id",
        Some("access_grants_grant_token_unique") => "grant_token",
        _ => "key",
    }
}
