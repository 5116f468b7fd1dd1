use axum::{extract::State, response::IntoResponse};
use service_core::{envelope::ApiResponse, error::AppError};

use crate::{
    dtos::{
        BackupCodesResponse, DisableTwoFactorRequest, TwoFactorCodeRequest,
        TwoFactorSetupResponse, TwoFactorStatusResponse, TwoFactorVerifyResponse,
    },
    middleware::AuthUser,
    models::{ClientContext, TwoFactorStatus},
    services::SecondFactor,
    utils::ValidatedJson,
    AppState,
};

/// Start two-factor enrolment
///
/// Returns the QR code and backup codes. Two-factor authentication stays
/// pending until a code is verified.
#[utoipa::path(
    post,
    path = "/auth/2fa/setup",
    responses(
        (status = 200, description = "Setup material generated", body = TwoFactorSetupResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
        (status = 409, description = "Already enabled", body = ErrorEnvelope)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn setup(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
) -> Result<impl IntoResponse, AppError> {
    let setup = state
        .auth_service
        .setup_two_factor(&auth.claims, &client)
        .await?;

    Ok(ApiResponse::ok(
        TwoFactorSetupResponse::from(setup),
        "Scan the QR code, then verify a code to enable two-factor authentication",
    ))
}

/// Verify a two-factor code
///
/// Enables a pending setup, resumes a suspended one, or confirms the code
/// for an enabled one.
#[utoipa::path(
    post,
    path = "/auth/2fa/verify",
    operation_id = "verify_two_factor",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Code accepted", body = TwoFactorVerifyResponse),
        (status = 400, description = "Two-factor authentication not set up", body = ErrorEnvelope),
        (status = 401, description = "Invalid code or not authenticated", body = ErrorEnvelope)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    ValidatedJson(req): ValidatedJson<TwoFactorCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let check = state
        .auth_service
        .verify_two_factor(&auth.claims, &req.code, &client)
        .await?;

    let message = match check.status {
        TwoFactorStatus::Enabled if check.method == SecondFactor::BackupCode => {
            "Backup code accepted"
        }
        TwoFactorStatus::Enabled => "Two-factor authentication is enabled",
        _ => "Code accepted",
    };

    Ok(ApiResponse::ok(
        TwoFactorVerifyResponse {
            status: check.status,
            method: check.method.as_str().to_string(),
            backup_codes_remaining: check.backup_codes_remaining,
        },
        message,
    ))
}

/// Disable or suspend two-factor authentication
#[utoipa::path(
    post,
    path = "/auth/2fa/disable",
    request_body = DisableTwoFactorRequest,
    responses(
        (status = 200, description = "Two-factor authentication disabled or suspended", body = TwoFactorStatusResponse),
        (status = 400, description = "Two-factor authentication not enabled", body = ErrorEnvelope),
        (status = 401, description = "Invalid code or not authenticated", body = ErrorEnvelope)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    ValidatedJson(req): ValidatedJson<DisableTwoFactorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let status = state
        .auth_service
        .disable_two_factor(&auth.claims, &req.code, req.temporary, &client)
        .await?;

    let message = if req.temporary {
        "Two-factor authentication suspended"
    } else {
        "Two-factor authentication disabled"
    };
    Ok(ApiResponse::ok(TwoFactorStatusResponse { status }, message))
}

/// Regenerate backup codes
///
/// Requires a current authenticator code. The previous codes stop working.
#[utoipa::path(
    post,
    path = "/auth/2fa/backup-codes",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "New backup codes", body = BackupCodesResponse),
        (status = 400, description = "Two-factor authentication not enabled", body = ErrorEnvelope),
        (status = 401, description = "Invalid code or not authenticated", body = ErrorEnvelope)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    ValidatedJson(req): ValidatedJson<TwoFactorCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let backup_codes = state
        .auth_service
        .regenerate_backup_codes(&auth.claims, &req.code, &client)
        .await?;

    Ok(ApiResponse::ok(
        BackupCodesResponse { backup_codes },
        "Backup codes regenerated",
    ))
}
