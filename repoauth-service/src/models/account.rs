//! Account model - every authenticable identity.
//!
//! Password accounts, developers and externally linked accounts share one
//! common record; the variant payload lives in [`AccountKind`].

use chrono::{DateTime, Utc};
use rand::RngCore;
use validator::{Validate, ValidationErrors};

use crate::utils::PasswordHashString;

/// Surrogate key assigned by the store on insert.
pub type AccountId = i64;

/// Twitter-style link: provider id, screen name and OAuth 1 token pair.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct TwitterLink {
    pub twitter_id: i64,
    #[validate(length(min = 1, max = 512))]
    pub twitter_name: String,
    #[validate(length(max = 512))]
    pub access_token: String,
    #[validate(length(max = 512))]
    pub access_token_secret: String,
}

/// Facebook-style link: provider id and OAuth 2 access token.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct FacebookLink {
    pub facebook_id: i64,
    #[validate(length(max = 512))]
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountKind {
    Password,
    Developer,
    Twitter(TwitterLink),
    Facebook(FacebookLink),
}

impl AccountKind {
    /// Discriminator stored in `accounts.account_kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Password => "password",
            AccountKind::Developer => "developer",
            AccountKind::Twitter(_) => "twitter",
            AccountKind::Facebook(_) => "facebook",
        }
    }

    pub fn is_developer(&self) -> bool {
        matches!(self, AccountKind::Developer)
    }

    fn check(&self) -> Result<(), ValidationErrors> {
        match self {
            AccountKind::Twitter(link) => link.validate(),
            AccountKind::Facebook(link) => link.validate(),
            AccountKind::Password | AccountKind::Developer => Ok(()),
        }
    }
}

/// A stored account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub nickname: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    /// PHC string, empty for accounts that only sign in through a provider.
    pub password_hash: String,
    pub auth_token: String,
    pub auth_hash: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub kind: AccountKind,
}

impl Account {
    pub fn is_developer(&self) -> bool {
        self.kind.is_developer()
    }

    pub fn has_password(&self) -> bool {
        !self.password_hash.is_empty()
    }
}

/// An account that has not been stored yet.
#[derive(Debug, Clone, Validate)]
pub struct NewAccount {
    #[validate(length(min = 1, max = 80, message = "Nickname must be 1-80 characters"))]
    pub nickname: String,
    #[validate(length(max = 255))]
    pub first_name: Option<String>,
    #[validate(length(max = 255))]
    pub last_name: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub password_hash: String,
    pub auth_token: String,
    #[validate(length(max = 255))]
    pub auth_hash: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub kind: AccountKind,
}

impl NewAccount {
    /// Start a new account with a fresh auth token drawn from `rng`.
    pub fn build<R: RngCore + ?Sized>(
        nickname: impl Into<String>,
        kind: AccountKind,
        rng: &mut R,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            first_name: None,
            last_name: None,
            email: None,
            password_hash: String::new(),
            auth_token: generate_token(rng),
            auth_hash: None,
            created_utc: Utc::now(),
            kind,
        }
    }

    pub fn with_password_hash(mut self, hash: PasswordHashString) -> Self {
        self.password_hash = hash.into_string();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self.last_name = Some(last_name.into());
        self
    }

    pub fn with_auth_hash(mut self, auth_hash: impl Into<String>) -> Self {
        self.auth_hash = Some(auth_hash.into());
        self
    }

    /// Validate the common fields and the variant payload.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.kind.check()
    }

    pub fn into_account(self, id: AccountId) -> Account {
        Account {
            id,
            nickname: self.nickname,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            password_hash: self.password_hash,
            auth_token: self.auth_token,
            auth_hash: self.auth_hash,
            created_utc: self.created_utc,
            kind: self.kind,
        }
    }
}

/// Random opaque token in UUID v4 layout, hyphenated.
pub fn generate_token<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string()
}
