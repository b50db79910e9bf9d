//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures while turning a bearer credential into a ready tenant context.
#[derive(Error, Debug)]
pub enum TenantError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("unknown lab: {0}")]
    UnknownTenant(String),
    #[error("registry store: {0}")]
    Registry(#[source] sqlx::Error),
    #[error("lab {lab_code}: connection failed: {source}")]
    Connection {
        lab_code: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("lab {lab_code}: schema sync failed: {source}")]
    Sync {
        lab_code: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("lab {lab_code}: seeding failed: {source}")]
    Seed {
        lab_code: String,
        #[source]
        source: sqlx::Error,
    },
    /// The setup attempt this request waited on failed; carries that attempt's error text.
    #[error("lab {lab_code}: setup failed: {message}")]
    SetupFailed { lab_code: String, message: String },
    #[error("lab {lab_code}: entity binding failed: {message}")]
    Binding { lab_code: String, message: String },
}

impl TenantError {
    /// Lab code the failure is scoped to, when one was resolved.
    pub fn lab_code(&self) -> Option<&str> {
        match self {
            TenantError::Connection { lab_code, .. }
            | TenantError::Sync { lab_code, .. }
            | TenantError::Seed { lab_code, .. }
            | TenantError::SetupFailed { lab_code, .. }
            | TenantError::Binding { lab_code, .. } => Some(lab_code),
            _ => None,
        }
    }

    /// Setup failures that leave a suspect connection behind.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            TenantError::Sync { .. } | TenantError::Seed { .. } | TenantError::SetupFailed { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Tenant(#[from] TenantError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Tenant(TenantError::InvalidCredential(_) | TenantError::UnknownTenant(_)) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "invalid or expired credential".to_string(),
            ),
            AppError::Tenant(
                TenantError::Connection { lab_code, .. }
                | TenantError::Sync { lab_code, .. }
                | TenantError::Seed { lab_code, .. }
                | TenantError::SetupFailed { lab_code, .. },
            ) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "lab_unavailable",
                format!("lab {} is temporarily unavailable", lab_code),
            ),
            AppError::Tenant(TenantError::Registry(_) | TenantError::Binding { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal error".to_string(),
            ),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Db(sqlx::Error::RowNotFound) => {
                (StatusCode::NOT_FOUND, "not_found", self.to_string())
            }
            AppError::Db(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                "database error".to_string(),
            ),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", self.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
