use axum::{extract::State, http::StatusCode, response::IntoResponse};
use service_core::{envelope::ApiResponse, error::AppError};

use crate::{
    dtos::{RegisterRequest, RegisterResponse},
    models::ClientContext,
    services::RegisterCommand,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Register a new user
///
/// Creates a new organization with the user as its admin.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Invalid email or weak password", body = ErrorEnvelope),
        (status = 409, description = "Email already registered", body = ErrorEnvelope),
        (status = 429, description = "Too many registrations from this address", body = ErrorEnvelope)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    client: ClientContext,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .auth_service
        .register(
            RegisterCommand {
                email: req.email,
                name: req.name.filter(|name| !name.trim().is_empty()),
                password: Password::new(req.password),
            },
            &client,
        )
        .await?;

    Ok(ApiResponse::ok(
        RegisterResponse {
            user: user.sanitized(),
        },
        "Registration successful",
    )
    .with_status(StatusCode::CREATED))
}
