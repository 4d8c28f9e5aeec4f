//! Conversion from `AppError` into `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `Unavailable` | `UNAVAILABLE` |
//! | `DatabaseError`, `InternalError`, `ConfigError` | `INTERNAL` |

use tonic::{Code, Status};

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        self.log();
        let code = match &self {
            AppError::BadRequest(_) => Code::InvalidArgument,
            AppError::NotFound(_) => Code::NotFound,
            AppError::Conflict(_) => Code::AlreadyExists,
            AppError::Unavailable(_) => Code::Unavailable,
            AppError::DatabaseError(_) | AppError::InternalError(_) | AppError::ConfigError(_) => {
                Code::Internal
            }
        };
        Status::new(code, self.public_message())
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_keeps_its_message() {
        let status: Status = AppError::BadRequest(anyhow::anyhow!("username is required")).into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "username is required");
    }

    #[test]
    fn unavailable_hides_backend_details() {
        let status = AppError::Unavailable(anyhow::anyhow!("connection refused (10.0.0.4:5432)"))
            .into_status();
        assert_eq!(status.code(), Code::Unavailable);
        assert!(!status.message().contains("10.0.0.4"));
    }

    #[test]
    fn server_side_failures_are_internal() {
        let status = AppError::DatabaseError(anyhow::anyhow!("column decode")).into_status();
        assert_eq!(status.code(), Code::Internal);

        let status = AppError::ConfigError(anyhow::anyhow!("bad port")).into_status();
        assert_eq!(status.code(), Code::Internal);
    }
}
