use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::domain::DomainError;
use crate::gateway::GatewayError;
use crate::ports::RepositoryError;
use crate::services::credentials::CredentialError;
use crate::use_cases::ServiceError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Tenant inactive: {0}")]
    TenantInactive(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Downstream error: {0}")]
    Downstream(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::TenantInactive(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Downstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Server-side failures are logged in full and answered generically.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Downstream(_) => "Payment gateway unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ParentSettled { .. } | DomainError::RefundExceedsParent(_) => {
                AppError::Conflict(err.to_string())
            }
            _ => AppError::Validation(err.to_string()),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::ReferenceCollision(_) | RepositoryError::DuplicateToken(_) => {
                AppError::Conflict(err.to_string())
            }
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::Corrupt(_) => AppError::Internal(err.to_string()),
            RepositoryError::Chain(e) => e.into(),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::UnknownTenant(_) => AppError::NotFound(err.to_string()),
            CredentialError::InactiveTenant(_) => AppError::TenantInactive(err.to_string()),
            CredentialError::Repository(e) => e.into(),
            CredentialError::Secret { .. } | CredentialError::SecretTimeout(_) => {
                AppError::Downstream(err.to_string())
            }
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Downstream(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => e.into(),
            ServiceError::Domain(e) => e.into(),
            ServiceError::Credentials(e) => e.into(),
            ServiceError::Gateway(e) => e.into(),
            ServiceError::Repository(e) => e.into(),
            ServiceError::NotFound(_) => AppError::NotFound(err.to_string()),
            ServiceError::Conflict(_) | ServiceError::AlreadyProcessed(_) => {
                AppError::Conflict(err.to_string())
            }
            ServiceError::DeadlineExceeded(_) => AppError::Downstream(err.to_string()),
            ServiceError::Task(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
