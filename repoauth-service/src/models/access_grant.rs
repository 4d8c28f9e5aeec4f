//! Access grant model - an account issued access to an application.
//!
//! Grants are stored and revoked by provisioning flows; repository access
//! decisions are ownership-only and never read them.

use chrono::{NaiveDate, Utc};
use rand::RngCore;
use sqlx::FromRow;

use super::account::generate_token;
use super::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AccessGrant {
    #[sqlx(rename = "grant_id")]
    pub id: i64,
    pub grant_token: String,
    pub created_date: NaiveDate,
    pub grantee_id: AccountId,
    pub application_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewAccessGrant {
    pub grant_token: String,
    pub created_date: NaiveDate,
    pub grantee_id: AccountId,
    pub application_id: i64,
}

impl NewAccessGrant {
    /// Issue a grant dated today with a token drawn from `rng`.
    pub fn issue<R: RngCore + ?Sized>(grantee_id: AccountId, application_id: i64, rng: &mut R) -> Self {
        Self {
            grant_token: generate_token(rng),
            created_date: Utc::now().date_naive(),
            grantee_id,
            application_id,
        }
    }

    pub fn into_grant(self, id: i64) -> AccessGrant {
        AccessGrant {
            id,
            grant_token: self.grant_token,
            created_date: self.created_date,
            grantee_id: self.grantee_id,
            application_id: self.application_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn issue_is_dated_today() {
        let grant = NewAccessGrant::issue(3, 9, &mut StdRng::seed_from_u64(11));
        assert_eq!(grant.created_date, Utc::now().date_naive());
        assert_eq!(grant.grantee_id, 3);
        assert_eq!(grant.application_id, 9);
    }
}
