//! Application model - a resource owned by exactly one developer.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use validator::Validate;

use super::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Application {
    #[sqlx(rename = "application_id")]
    pub id: i64,
    /// Owning developer. The reverse edge is a query, never a stored list.
    pub author_id: AccountId,
    pub name: String,
    pub description: Option<String>,
    /// Repository or resource identifier this application governs.
    #[sqlx(rename = "app_domain")]
    pub domain: String,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewApplication {
    pub author_id: AccountId,
    #[validate(length(min = 1, max = 255, message = "Application name is required"))]
    pub name: String,
    #[validate(length(max = 2048))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Application domain is required"))]
    pub domain: String,
    pub created_utc: DateTime<Utc>,
}

impl NewApplication {
    pub fn new(author_id: AccountId, name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            author_id,
            name: name.into(),
            description: None,
            domain: domain.into(),
            created_utc: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn into_application(self, id: i64) -> Application {
        Application {
            id,
            author_id: self.author_id,
            name: self.name,
            description: self.description,
            domain: self.domain,
            created_utc: self.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_domain_are_required() {
        assert!(NewApplication::new(1, "", "repoX").validate().is_err());
        assert!(NewApplication::new(1, "tool", "").validate().is_err());
        assert!(NewApplication::new(1, "tool", "repoX").validate().is_ok());
    }

    #[test]
    fn description_is_bounded() {
        let app = NewApplication::new(1, "tool", "repoX").with_description("d".repeat(2049));
        let errors = app.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("description"));
    }
}
