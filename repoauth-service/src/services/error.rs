//! Errors raised by the decision procedures.

use service_core::error::AppError;
use thiserror::Error;

use super::store::StoreError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or empty input. Never folded into a `false` decision.
    #[error("{0}")]
    InvalidArgument(String),

    /// The gateway could not complete a read.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),

    /// Cut off by the shutdown drain deadline before deciding.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(e) => ServiceError::PersistenceUnavailable(e),
            other => ServiceError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidArgument(message) => AppError::BadRequest(anyhow::anyhow!(message)),
            ServiceError::PersistenceUnavailable(e) => AppError::Unavailable(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::ShuttingDown => {
                AppError::Unavailable(anyhow::anyhow!("server is shutting down"))
            }
        }
    }
}

impl ServiceError {
    /// Label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "invalid_argument",
            ServiceError::PersistenceUnavailable(_) => "unavailable",
            ServiceError::Internal(_) => "internal",
            ServiceError::ShuttingDown => "shutting_down",
        }
    }
}

/// Reject empty input with an `InvalidArgument` naming the field.
pub fn require_non_empty(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.is_empty() {
        return Err(ServiceError::InvalidArgument(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::grpc::IntoStatus;
    use tonic::Code;

    #[test]
    fn empty_values_are_invalid() {
        let err = require_non_empty("username", "").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(ref m) if m == "username is required"));
        assert!(require_non_empty("username", "alice").is_ok());
    }

    #[test]
    fn store_unavailable_stays_unavailable() {
        let err = ServiceError::from(StoreError::Unavailable(anyhow::anyhow!("pool timed out")));
        assert!(matches!(err, ServiceError::PersistenceUnavailable(_)));
    }

    #[test]
    fn other_store_errors_are_internal() {
        assert!(matches!(
            ServiceError::from(StoreError::NotFound),
            ServiceError::Internal(_)
        ));
        assert!(matches!(
            ServiceError::from(StoreError::Duplicate { field: "nickname" }),
            ServiceError::Internal(_)
        ));
    }

    #[test]
    fn status_codes_follow_the_fault_table() {
        let invalid = AppError::from(ServiceError::InvalidArgument("password is required".into()))
            .into_status();
        assert_eq!(invalid.code(), Code::InvalidArgument);
        assert_eq!(invalid.message(), "password is required");

        let unavailable =
            AppError::from(ServiceError::PersistenceUnavailable(anyhow::anyhow!("down")))
                .into_status();
        assert_eq!(unavailable.code(), Code::Unavailable);

        let internal =
            AppError::from(ServiceError::Internal(anyhow::anyhow!("decode"))).into_status();
        assert_eq!(internal.code(), Code::Internal);

        let cut_off = AppError::from(ServiceError::ShuttingDown).into_status();
        assert_eq!(cut_off.code(), Code::Unavailable);
    }
}
