pub mod auth;
pub mod two_factor;

pub use auth::*;
pub use two_factor::*;

use serde::Serialize;
use service_core::envelope::FieldError;
use utoipa::ToSchema;

/// Shape of every failed response, for the API docs.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[schema(example = false)]
    pub success: bool,
    #[schema(example = "Invalid email or password")]
    pub message: String,
    #[schema(value_type = Option<Vec<Object>>)]
    pub errors: Option<Vec<FieldError>>,
    /// Seconds until a retry may succeed (429 and 503 only).
    #[schema(example = 1800)]
    pub retry_after: Option<u64>,
}
