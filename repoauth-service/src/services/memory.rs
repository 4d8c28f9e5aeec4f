//! In-process identity store.
//!
//! Enforces the same uniqueness and ownership rules as the PostgreSQL
//! schema. Backs `STORE_BACKEND=memory` and the test suites; `set_available`
//! simulates a lost backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;
use validator::Validate;

use super::store::{IdentityReader, IdentityWriter, StoreError};
use crate::models::{
    AccessGrant, Account, AccountId, AccountKind, Application, DeveloperKey, NewAccessGrant,
    NewAccount, NewApplication, NewDeveloperKey,
};

#[derive(Default)]
struct Tables {
    sequence: i64,
    accounts: BTreeMap<AccountId, Account>,
    applications: BTreeMap<i64, Application>,
    grants: BTreeMap<i64, AccessGrant>,
    keys: BTreeMap<i64, DeveloperKey>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn account_by_nickname(&self, nickname: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.nickname == nickname)
    }

    fn check_account_unique(&self, account: &NewAccount) -> Result<(), StoreError> {
        for existing in self.accounts.values() {
            if existing.nickname == account.nickname {
                return Err(StoreError::Duplicate { field: "nickname" });
            }
            if account.email.is_some() && existing.email == account.email {
                return Err(StoreError::Duplicate { field: "email" });
            }
            if existing.auth_token == account.auth_token {
                return Err(StoreError::Duplicate { field: "auth_token" });
            }
            match (&existing.kind, &account.kind) {
                (AccountKind::Twitter(a), AccountKind::Twitter(b)) => {
                    if a.twitter_id == b.twitter_id {
                        return Err(StoreError::Duplicate { field: "twitter_id" });
                    }
                    if a.twitter_name == b.twitter_name {
                        return Err(StoreError::Duplicate { field: "twitter_name" });
                    }
                }
                (AccountKind::Facebook(a), AccountKind::Facebook(b)) => {
                    if a.facebook_id == b.facebook_id {
                        return Err(StoreError::Duplicate { field: "facebook_id" });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn require_developer(&self, id: AccountId) -> Result<(), StoreError> {
        match self.accounts.get(&id) {
            Some(account) if account.is_developer() => Ok(()),
            Some(_) => Err(StoreError::Constraint(format!(
                "account {} is not a developer",
                id
            ))),
            None => Err(StoreError::Constraint(format!("account {} does not exist", id))),
        }
    }

    fn remove_application(&mut self, id: i64) -> bool {
        let removed = self.applications.remove(&id).is_some();
        if removed {
            self.grants.retain(|_, g| g.application_id != id);
        }
        removed
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated reachability. While unavailable every operation
    /// fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.ensure_available()?;
        self.tables
            .read()
            .map_err(|_| StoreError::Internal(anyhow::anyhow!("memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.ensure_available()?;
        self.tables
            .write()
            .map_err(|_| StoreError::Internal(anyhow::anyhow!("memory store lock poisoned")))
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(anyhow::anyhow!(
                "memory store marked unavailable"
            )))
        }
    }
}

#[async_trait]
impl IdentityReader for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    #[instrument(skip(self))]
    async fn find_account_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.account_by_nickname(nickname).cloned())
    }

    #[instrument(skip(self, password_hash))]
    async fn find_account_by_nickname_and_password_hash(
        &self,
        nickname: &str,
        password_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .read()?
            .account_by_nickname(nickname)
            .filter(|a| a.password_hash == password_hash)
            .cloned())
    }

    #[instrument(skip(self))]
    async fn find_application_by_author_and_domain(
        &self,
        author_nickname: &str,
        domain: &str,
    ) -> Result<Option<Application>, StoreError> {
        let tables = self.read()?;
        let author_id = match tables.account_by_nickname(author_nickname) {
            Some(author) => author.id,
            None => return Ok(None),
        };

        // BTreeMap iterates in id order, so the first match is the lowest id.
        Ok(tables
            .applications
            .values()
            .find(|app| app.author_id == author_id && app.domain == domain)
            .cloned())
    }
}

#[async_trait]
impl IdentityWriter for MemoryStore {
    #[instrument(skip(self, account), fields(nickname = %account.nickname))]
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        account.check()?;

        let mut tables = self.write()?;
        tables.check_account_unique(&account)?;

        let id = tables.next_id();
        let account = account.into_account(id);
        tables.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn find_account_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: AccountId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.accounts.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }

        let authored: Vec<i64> = tables
            .applications
            .values()
            .filter(|app| app.author_id == id)
            .map(|app| app.id)
            .collect();
        for app_id in authored {
            tables.remove_application(app_id);
        }
        tables.grants.retain(|_, g| g.grantee_id != id);
        tables.keys.retain(|_, k| k.developer_id != id);
        Ok(())
    }

    #[instrument(skip(self, application), fields(author_id = application.author_id, domain = %application.domain))]
    async fn insert_application(
        &self,
        application: NewApplication,
    ) -> Result<Application, StoreError> {
        application.validate()?;

        let mut tables = self.write()?;
        tables.require_developer(application.author_id)?;

        let id = tables.next_id();
        let application = application.into_application(id);
        tables.applications.insert(id, application.clone());
        Ok(application)
    }

    async fn find_application_by_id(&self, id: i64) -> Result<Option<Application>, StoreError> {
        Ok(self.read()?.applications.get(&id).cloned())
    }

    async fn delete_application(&self, id: i64) -> Result<(), StoreError> {
        if self.write()?.remove_application(id) {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn list_applications_by_author(
        &self,
        author_id: AccountId,
    ) -> Result<Vec<Application>, StoreError> {
        Ok(self
            .read()?
            .applications
            .values()
            .filter(|app| app.author_id == author_id)
            .cloned()
            .collect())
    }

    async fn insert_access_grant(
        &self,
        grant: NewAccessGrant,
    ) -> Result<AccessGrant, StoreError> {
        let mut tables = self.write()?;
        if !tables.accounts.contains_key(&grant.grantee_id) {
            return Err(StoreError::Constraint(format!(
                "account {} does not exist",
                grant.grantee_id
            )));
        }
        if !tables.applications.contains_key(&grant.application_id) {
            return Err(StoreError::Constraint(format!(
                "application {} does not exist",
                grant.application_id
            )));
        }
        if tables
            .grants
            .values()
            .any(|g| g.grant_token == grant.grant_token)
        {
            return Err(StoreError::Duplicate {
                field: "grant_token",
            });
        }

        let id = tables.next_id();
        let grant = grant.into_grant(id);
        tables.grants.insert(id, grant.clone());
        Ok(grant)
    }

    async fn find_access_grant_by_token(
        &self,
        grant_token: &str,
    ) -> Result<Option<AccessGrant>, StoreError> {
        Ok(self
            .read()?
            .grants
            .values()
            .find(|g| g.grant_token == grant_token)
            .cloned())
    }

    async fn delete_access_grant(&self, id: i64) -> Result<(), StoreError> {
        match self.write()?.grants.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    async fn insert_developer_key(
        &self,
        key: NewDeveloperKey,
    ) -> Result<DeveloperKey, StoreError> {
        key.validate()?;

        let mut tables = self.write()?;
        tables.require_developer(key.developer_id)?;

        let id = tables.next_id();
        let key = key.into_key(id, Utc::now());
        tables.keys.insert(id, key.clone());
        Ok(key)
    }

    async fn find_developer_key_by_fingerprint(
        &self,
        key_fingerprint: &str,
    ) -> Result<Option<DeveloperKey>, StoreError> {
        Ok(self
            .read()?
            .keys
            .values()
            .find(|k| k.key_fingerprint == key_fingerprint)
            .cloned())
    }

    async fn list_developer_keys(
        &self,
        developer_id: AccountId,
    ) -> Result<Vec<DeveloperKey>, StoreError> {
        Ok(self
            .read()?
            .keys
            .values()
            .filter(|k| k.developer_id == developer_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn developer(nickname: &str, rng: &mut StdRng) -> NewAccount {
        NewAccount::build(nickname, AccountKind::Developer, rng)
    }

    #[tokio::test]
    async fn lookup_by_nickname_is_case_sensitive() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        store.insert_account(developer("alice", &mut rng)).await.unwrap();

        assert!(store.find_account_by_nickname("alice").await.unwrap().is_some());
        assert!(store.find_account_by_nickname("Alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_domain_resolves_to_lowest_id() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(2);
        let alice = store.insert_account(developer("alice", &mut rng)).await.unwrap();

        let first = store
            .insert_application(NewApplication::new(alice.id, "first", "repoX"))
            .await
            .unwrap();
        store
            .insert_application(NewApplication::new(alice.id, "second", "repoX"))
            .await
            .unwrap();

        let found = store
            .find_application_by_author_and_domain("alice", "repoX")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn deleting_a_developer_cascades() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(3);
        let alice = store.insert_account(developer("alice", &mut rng)).await.unwrap();
        let app = store
            .insert_application(NewApplication::new(alice.id, "tool", "repoX"))
            .await
            .unwrap();
        store
            .insert_developer_key(NewDeveloperKey::new(alice.id, "ssh-ed25519 AAAA", "SHA256:a"))
            .await
            .unwrap();

        store.delete_account(alice.id).await.unwrap();

        assert!(store.find_application_by_id(app.id).await.unwrap().is_none());
        assert!(store.list_developer_keys(alice.id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete_account(alice.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(matches!(
            store.find_account_by_nickname("alice").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.health_check().await.is_err());

        store.set_available(true);
        assert!(store.health_check().await.is_ok());
    }
}
