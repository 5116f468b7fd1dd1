use axum::{extract::State, response::IntoResponse};
use axum_extra::extract::CookieJar;
use service_core::{envelope::ApiResponse, error::AppError};

use crate::{
    dtos::{ChangePasswordRequest, ChangePasswordResponse, OnboardingResponse},
    middleware::AuthUser,
    models::ClientContext,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Change the caller's password
///
/// Every other session of the user is revoked.
#[utoipa::path(
    post,
    path = "/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = ChangePasswordResponse),
        (status = 400, description = "New password too weak", body = ErrorEnvelope),
        (status = 401, description = "Current password wrong or not authenticated", body = ErrorEnvelope)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let sessions_revoked = state
        .auth_service
        .change_password(
            &auth.claims,
            &Password::new(req.current_password),
            &Password::new(req.new_password),
            &client,
        )
        .await?;

    Ok(ApiResponse::ok(
        ChangePasswordResponse { sessions_revoked },
        "Password changed",
    ))
}

/// Mark onboarding as completed
///
/// Re-issues the access token for the current session so its claims reflect
/// the new state.
#[utoipa::path(
    post,
    path = "/auth/onboarding/complete",
    responses(
        (status = 200, description = "Onboarding completed; accessToken cookie updated", body = OnboardingResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn complete_onboarding(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let (user, access) = state
        .auth_service
        .complete_onboarding(&auth.claims, &client)
        .await?;

    let jar = jar.add(state.cookies.access_cookie(access.access_token.clone()));
    Ok((
        jar,
        ApiResponse::ok(
            OnboardingResponse {
                user: user.sanitized(),
                access_token: access.access_token,
                expires_in: access.expires_in,
            },
            "Onboarding completed",
        ),
    ))
}
