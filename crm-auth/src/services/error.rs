use service_core::envelope::FieldError;
use service_core::error::AppError;
use thiserror::Error;

use super::jwt::TokenError;
use super::user_store::StoreError;
use crate::models::TwoFactorTransitionError;

pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Too many attempts, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Two-factor code required")]
    TwoFactorRequired,

    #[error("Invalid two-factor code")]
    TwoFactorInvalidCode,

    #[error("Two-factor authentication is already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Two-factor authentication is not enabled")]
    TwoFactorNotEnabled,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ServiceError::TokenExpired,
            TokenError::Invalid => ServiceError::TokenInvalid,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => ServiceError::AlreadyExists(what),
            StoreError::Unavailable(e) => ServiceError::StoreUnavailable(e),
        }
    }
}

impl From<TwoFactorTransitionError> for ServiceError {
    fn from(err: TwoFactorTransitionError) -> Self {
        match err {
            TwoFactorTransitionError::AlreadyEnabled => ServiceError::TwoFactorAlreadyEnabled,
            TwoFactorTransitionError::NotEnabled => ServiceError::TwoFactorNotEnabled,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials => {
                AppError::Unauthorized(INVALID_CREDENTIALS_MESSAGE.to_string())
            }
            ServiceError::AccountInactive => {
                AppError::Forbidden("Account is inactive".to_string())
            }
            ServiceError::TokenExpired => AppError::Challenge {
                message: "Token expired".to_string(),
                data: serde_json::json!({ "code": "token_expired" }),
            },
            ServiceError::TokenInvalid => AppError::Unauthorized("Invalid token".to_string()),
            ServiceError::RateLimited { retry_after } => AppError::TooManyRequests {
                message: "Too many attempts. Please try again later.".to_string(),
                retry_after,
            },
            ServiceError::TwoFactorRequired => AppError::Challenge {
                message: "Two-factor authentication code required".to_string(),
                data: serde_json::json!({ "requiresTwoFactor": true }),
            },
            ServiceError::TwoFactorInvalidCode => {
                AppError::Unauthorized("Invalid two-factor code".to_string())
            }
            ServiceError::TwoFactorAlreadyEnabled => {
                AppError::Conflict("Two-factor authentication is already enabled".to_string())
            }
            ServiceError::TwoFactorNotEnabled => {
                AppError::BadRequest("Two-factor authentication is not enabled".to_string())
            }
            ServiceError::SessionNotFound => {
                AppError::Unauthorized("Session not found".to_string())
            }
            ServiceError::SessionRevoked => AppError::Unauthorized("Session revoked".to_string()),
            ServiceError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            ServiceError::AlreadyExists(what) => {
                AppError::Conflict(format!("{} already exists", what))
            }
            ServiceError::Validation(errors) => {
                AppError::FieldErrors("Validation failed".to_string(), errors)
            }
            ServiceError::StoreUnavailable(e) => {
                tracing::error!(error = ?e, "Backing store unavailable");
                AppError::ServiceUnavailable {
                    message: "Service temporarily unavailable".to_string(),
                    retry_after: Some(5),
                }
            }
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
