//! PostgreSQL identity store.
//!
//! Every operation opens its own transaction. Reads mark it
//! `READ ONLY` and commit after the fetch; any early return drops the
//! transaction, which rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{info, instrument};
use validator::Validate;

use super::metrics::DB_QUERY_DURATION;
use super::store::{map_sqlx_error, IdentityReader, IdentityWriter, StoreError};
use crate::config::DatabaseConfig;
use crate::db;
use crate::models::{
    AccessGrant, Account, AccountId, AccountKind, Application, DeveloperKey, FacebookLink,
    NewAccessGrant, NewAccount, NewApplication, NewDeveloperKey, TwitterLink,
};

const ACCOUNT_SELECT: &str = r#"
    SELECT a.account_id, a.account_kind, a.nickname, a.first_name, a.last_name, a.email,
           a.password_hash, a.auth_token, a.auth_hash, a.created_utc,
           t.twitter_id, t.twitter_name,
           t.access_token AS twitter_access_token,
           t.access_token_secret AS twitter_access_token_secret,
           f.facebook_id,
           f.access_token AS facebook_access_token
    FROM accounts a
    LEFT JOIN twitter_accounts t ON t.account_id = a.account_id
    LEFT JOIN facebook_accounts f ON f.account_id = a.account_id
"#;

const APPLICATION_COLUMNS: &str =
    "application_id, author_id, name, description, app_domain, created_utc";

/// Flat row produced by `ACCOUNT_SELECT`.
#[derive(Debug, FromRow)]
struct AccountRow {
    account_id: i64,
    account_kind: String,
    nickname: String,
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    password_hash: String,
    auth_token: String,
    auth_hash: Option<String>,
    created_utc: DateTime<Utc>,
    twitter_id: Option<i64>,
    twitter_name: Option<String>,
    twitter_access_token: Option<String>,
    twitter_access_token_secret: Option<String>,
    facebook_id: Option<i64>,
    facebook_access_token: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let account_id = row.account_id;
        let missing = |table: &str| {
            StoreError::Internal(anyhow::anyhow!(
                "account {} has no {} row",
                account_id,
                table
            ))
        };

        let kind = match row.account_kind.as_str() {
            "password" => AccountKind::Password,
            "developer" => AccountKind::Developer,
            "twitter" => match (
                row.twitter_id,
                row.twitter_name.clone(),
                row.twitter_access_token.clone(),
                row.twitter_access_token_secret.clone(),
            ) {
                (Some(twitter_id), Some(twitter_name), Some(access_token), Some(secret)) => {
                    AccountKind::Twitter(TwitterLink {
                        twitter_id,
                        twitter_name,
                        access_token,
                        access_token_secret: secret,
                    })
                }
                _ => return Err(missing("twitter_accounts")),
            },
            "facebook" => match (row.facebook_id, row.facebook_access_token.clone()) {
                (Some(facebook_id), Some(access_token)) => AccountKind::Facebook(FacebookLink {
                    facebook_id,
                    access_token,
                }),
                _ => return Err(missing("facebook_accounts")),
            },
            other => {
                return Err(StoreError::Internal(anyhow::anyhow!(
                    "unknown account kind '{}'",
                    other
                )))
            }
        };

        Ok(Account {
            id: account_id,
            nickname: row.nickname,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            password_hash: row.password_hash,
            auth_token: row.auth_token,
            auth_hash: row.auth_hash,
            created_utc: row.created_utc,
            kind,
        })
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect a pool sized from `config`.
    #[instrument(skip(config), fields(service = "repoauth-service"))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = db::create_pool(config).await.map_err(map_sqlx_error)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        db::run_migrations(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(anyhow::anyhow!("Migration failed: {}", e)))
    }

    async fn begin_read(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(tx)
    }

    async fn begin_write(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(map_sqlx_error)
    }

    async fn fetch_account(
        &self,
        operation: &str,
        filter: &str,
        binds: &[&str],
    ) -> Result<Option<Account>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let sql = format!("{} WHERE {}", ACCOUNT_SELECT, filter);
        let mut tx = self.begin_read().await?;
        let mut query = sqlx::query_as::<_, AccountRow>(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        timer.observe_duration();

        row.map(Account::try_from).transpose()
    }
}

#[async_trait]
impl IdentityReader for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_account_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.fetch_account("find_account_by_nickname", "a.nickname = $1", &[nickname])
            .await
    }

    #[instrument(skip(self, password_hash))]
    async fn find_account_by_nickname_and_password_hash(
        &self,
        nickname: &str,
        password_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.fetch_account(
            "find_account_by_nickname_and_password_hash",
            "a.nickname = $1 AND a.password_hash = $2",
            &[nickname, password_hash],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn find_application_by_author_and_domain(
        &self,
        author_nickname: &str,
        domain: &str,
    ) -> Result<Option<Application>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_application_by_author_and_domain"])
            .start_timer();

        let mut tx = self.begin_read().await?;
        let application = sqlx::query_as::<_, Application>(
            r#"
            SELECT ap.application_id, ap.author_id, ap.name, ap.description, ap.app_domain, ap.created_utc
            FROM applications ap
            JOIN accounts a ON a.account_id = ap.author_id
            WHERE a.nickname = $1 AND ap.app_domain = $2
            ORDER BY ap.application_id
            LIMIT 1
            "#,
        )
        .bind(author_nickname)
        .bind(domain)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        timer.observe_duration();

        Ok(application)
    }
}

#[async_trait]
impl IdentityWriter for Database {
    #[instrument(skip(self, account), fields(nickname = %account.nickname, kind = account.kind.as_str()))]
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        account.check()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_account"])
            .start_timer();

        let mut tx = self.begin_write().await?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO accounts (account_kind, nickname, first_name, last_name, email,
                                  password_hash, auth_token, auth_hash, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING account_id
            "#,
        )
        .bind(account.kind.as_str())
        .bind(&account.nickname)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(&account.auth_token)
        .bind(&account.auth_hash)
        .bind(account.created_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        match &account.kind {
            AccountKind::Password => {}
            AccountKind::Developer => {
                sqlx::query("INSERT INTO developer_accounts (account_id) VALUES ($1)")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            AccountKind::Twitter(link) => {
                sqlx::query(
                    r#"
                    INSERT INTO twitter_accounts (account_id, twitter_id, twitter_name,
                                                  access_token, access_token_secret)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(id)
                .bind(link.twitter_id)
                .bind(&link.twitter_name)
                .bind(&link.access_token)
                .bind(&link.access_token_secret)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            }
            AccountKind::Facebook(link) => {
                sqlx::query(
                    "INSERT INTO facebook_accounts (account_id, facebook_id, access_token) VALUES ($1, $2, $3)",
                )
                .bind(id)
                .bind(link.facebook_id)
                .bind(&link.access_token)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        timer.observe_duration();

        info!(account_id = id, "Account created");

        Ok(account.into_account(id))
    }

    #[instrument(skip(self))]
    async fn find_account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_account_by_id"])
            .start_timer();

        let sql = format!("{} WHERE a.account_id = $1", ACCOUNT_SELECT);
        let mut tx = self.begin_read().await?;
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        timer.observe_duration();

        row.map(Account::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        self.delete_by_id("delete_account", "DELETE FROM accounts WHERE account_id = $1", id)
            .await
    }

    #[instrument(skip(self, application), fields(author_id = application.author_id, domain = %application.domain))]
    async fn insert_application(
        &self,
        application: NewApplication,
    ) -> Result<Application, StoreError> {
        application.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_application"])
            .start_timer();

        let mut tx = self.begin_write().await?;
        let sql = format!(
            r#"
            INSERT INTO applications (author_id, name, description, app_domain, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            APPLICATION_COLUMNS
        );
        let stored = sqlx::query_as::<_, Application>(&sql)
            .bind(application.author_id)
            .bind(&application.name)
            .bind(&application.description)
            .bind(&application.domain)
            .bind(application.created_utc)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        timer.observe_duration();

        info!(application_id = stored.id, "Application created");

        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn find_application_by_id(&self, id: i64) -> Result<Option<Application>, StoreError> {
        let sql = format!(
            "SELECT {} FROM applications WHERE application_id = $1",
            APPLICATION_COLUMNS
        );
        let mut tx = self.begin_read().await?;
        let application = sqlx::query_as::<_, Application>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(application)
    }

    #[instrument(skip(self))]
    async fn delete_application(&self, id: i64) -> Result<(), StoreError> {
        self.delete_by_id(
            "delete_application",
            "DELETE FROM applications WHERE application_id = $1",
            id,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_applications_by_author(
        &self,
        author_id: AccountId,
    ) -> Result<Vec<Application>, StoreError> {
        let sql = format!(
            "SELECT {} FROM applications WHERE author_id = $1 ORDER BY application_id",
            APPLICATION_COLUMNS
        );
        let mut tx = self.begin_read().await?;
        let applications = sqlx::query_as::<_, Application>(&sql)
            .bind(author_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(applications)
    }

    #[instrument(skip(self, grant), fields(grantee_id = grant.grantee_id, application_id = grant.application_id))]
    async fn insert_access_grant(
        &self,
        grant: NewAccessGrant,
    ) -> Result<AccessGrant, StoreError> {
        let mut tx = self.begin_write().await?;
        let stored = sqlx::query_as::<_, AccessGrant>(
            r#"
            INSERT INTO access_grants (grant_token, created_date, grantee_id, application_id)
            VALUES ($1, $2, $3, $4)
            RETURNING grant_id, grant_token, created_date, grantee_id, application_id
            "#,
        )
        .bind(&grant.grant_token)
        .bind(grant.created_date)
        .bind(grant.grantee_id)
        .bind(grant.application_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(stored)
    }

    #[instrument(skip(self, grant_token))]
    async fn find_access_grant_by_token(
        &self,
        grant_token: &str,
    ) -> Result<Option<AccessGrant>, StoreError> {
        let mut tx = self.begin_read().await?;
        let grant = sqlx::query_as::<_, AccessGrant>(
            r#"
            SELECT grant_id, grant_token, created_date, grantee_id, application_id
            FROM access_grants
            WHERE grant_token = $1
            "#,
        )
        .bind(grant_token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(grant)
    }

    #[instrument(skip(self))]
    async fn delete_access_grant(&self, id: i64) -> Result<(), StoreError> {
        self.delete_by_id(
            "delete_access_grant",
            "DELETE FROM access_grants WHERE grant_id = $1",
            id,
        )
        .await
    }

    #[instrument(skip(self, key), fields(developer_id = key.developer_id))]
    async fn insert_developer_key(
        &self,
        key: NewDeveloperKey,
    ) -> Result<DeveloperKey, StoreError> {
        key.validate()?;

        let mut tx = self.begin_write().await?;
        let stored = sqlx::query_as::<_, DeveloperKey>(
            r#"
            INSERT INTO developer_keys (developer_id, public_key, key_fingerprint)
            VALUES ($1, $2, $3)
            RETURNING key_id, developer_id, public_key, key_fingerprint, created_utc
            "#,
        )
        .bind(key.developer_id)
        .bind(&key.public_key)
        .bind(&key.key_fingerprint)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn find_developer_key_by_fingerprint(
        &self,
        key_fingerprint: &str,
    ) -> Result<Option<DeveloperKey>, StoreError> {
        let mut tx = self.begin_read().await?;
        let key = sqlx::query_as::<_, DeveloperKey>(
            r#"
            SELECT key_id, developer_id, public_key, key_fingerprint, created_utc
            FROM developer_keys
            WHERE key_fingerprint = $1
            ORDER BY key_id
            LIMIT 1
            "#,
        )
        .bind(key_fingerprint)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(key)
    }

    #[instrument(skip(self))]
    async fn list_developer_keys(
        &self,
        developer_id: AccountId,
    ) -> Result<Vec<DeveloperKey>, StoreError> {
        let mut tx = self.begin_read().await?;
        let keys = sqlx::query_as::<_, DeveloperKey>(
            r#"
            SELECT key_id, developer_id, public_key, key_fingerprint, created_utc
            FROM developer_keys
            WHERE developer_id = $1
            ORDER BY key_id
            "#,
        )
        .bind(developer_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(keys)
    }
}

impl Database {
    async fn delete_by_id(&self, operation: &str, sql: &str, id: i64) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let mut tx = self.begin_write().await?;
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        timer.observe_duration();
        Ok(())
    }
}
