use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::envelope::{ApiResponse, FieldError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    FieldErrors(String, Vec<FieldError>),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 401 that carries a machine-readable hint, e.g. a second factor is needed.
    #[error("Unauthorized: {message}")]
    Challenge {
        message: String,
        data: serde_json::Value,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {message}")]
    TooManyRequests { message: String, retry_after: u64 },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::FieldErrors(..) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) | AppError::Challenge { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

fn validation_field_errors(errors: &validator::ValidationErrors) -> Vec<FieldError> {
    let mut items: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({})", e.code));
                FieldError::new(field.clone(), message)
            })
        })
        .collect();
    items.sort_by(|a, b| a.field.cmp(&b.field));
    items
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ApiResponse::failure("");

        match self {
            AppError::ValidationError(err) => {
                body.message = "Validation failed".to_string();
                body.errors = Some(validation_field_errors(&err));
            }
            AppError::FieldErrors(message, errors) => {
                body.message = message;
                body.errors = Some(errors);
            }
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => body.message = msg,
            AppError::Challenge { message, data } => {
                body.message = message;
                body.data = Some(data);
            }
            AppError::TooManyRequests {
                message,
                retry_after,
            } => {
                body.message = message;
                body.retry_after = Some(retry_after);
            }
            AppError::ServiceUnavailable {
                message,
                retry_after,
            } => {
                body.message = message;
                body.retry_after = retry_after;
            }
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal server error");
                body.message = "Internal server error".to_string();
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = ?err, "Configuration error");
                body.message = "Internal server error".to_string();
            }
        }

        let retry_after = body.retry_after;
        let mut res = (status, body).into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry));
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after_header_and_field() {
        let res = AppError::TooManyRequests {
            message: "Too many attempts".to_string(),
            retry_after: 1800,
        }
        .into_response();

        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "1800");
        let body = body_json(res).await;
        assert_eq!(body["retryAfter"], 1800);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn internal_detail_is_not_exposed() {
        let res = AppError::InternalError(anyhow::anyhow!("argon2 params rejected: m_cost"))
            .into_response();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(res).await;
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("argon2"));
    }

    #[tokio::test]
    async fn field_errors_are_itemized() {
        let res = AppError::FieldErrors(
            "Password does not meet requirements".to_string(),
            vec![
                FieldError::new("password", "At least 8 characters"),
                FieldError::new("password", "At least one digit"),
            ],
        )
        .into_response();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }
}
