//! Uniform response envelope shared by every route.
//!
//! Success and failure bodies have the same shape so clients can branch on
//! `success` alone:
//!
//! ```json
//! {"success": false, "message": "Too many attempts", "retryAfter": 1800}
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// One violated rule on one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            errors: None,
            retry_after: None,
        }
    }

    pub fn with_status(self, status: StatusCode) -> (StatusCode, Self) {
        (status, self)
    }
}

impl ApiResponse<serde_json::Value> {
    /// Success without a payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: message.into(),
            errors: None,
            retry_after: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            errors: None,
            retry_after: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_optional_fields_are_omitted() {
        let body = serde_json::to_value(ApiResponse::message("Logged out")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"success": true, "message": "Logged out"})
        );
    }

    #[test]
    fn retry_after_is_camel_cased() {
        let mut response = ApiResponse::failure("slow down");
        response.retry_after = Some(30);
        let body = serde_json::to_value(response).unwrap();
        assert_eq!(body["retryAfter"], 30);
        assert_eq!(body["success"], false);
    }
}
