//! Developer key model - public key credentials for out-of-band access.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use validator::Validate;

use super::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DeveloperKey {
    #[sqlx(rename = "key_id")]
    pub id: i64,
    pub developer_id: AccountId,
    pub public_key: String,
    pub key_fingerprint: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewDeveloperKey {
    pub developer_id: AccountId,
    #[validate(length(min = 1, max = 8128, message = "Public key must be 1-8128 characters"))]
    pub public_key: String,
    #[validate(length(min = 1, max = 512, message = "Fingerprint must be 1-512 characters"))]
    pub key_fingerprint: String,
}

impl NewDeveloperKey {
    pub fn new(
        developer_id: AccountId,
        public_key: impl Into<String>,
        key_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            developer_id,
            public_key: public_key.into(),
            key_fingerprint: key_fingerprint.into(),
        }
    }

    pub fn into_key(self, id: i64, created_utc: DateTime<Utc>) -> DeveloperKey {
        DeveloperKey {
            id,
            developer_id: self.developer_id,
            public_key: self.public_key,
            key_fingerprint: self.key_fingerprint,
            created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_material_is_bounded() {
        assert!(NewDeveloperKey::new(1, "ssh-ed25519 AAAA", "SHA256:abc")
            .validate()
            .is_ok());
        assert!(NewDeveloperKey::new(1, "k".repeat(8129), "SHA256:abc")
            .validate()
            .is_err());
        assert!(NewDeveloperKey::new(1, "ssh-ed25519 AAAA", "")
            .validate()
            .is_err());
    }
}
