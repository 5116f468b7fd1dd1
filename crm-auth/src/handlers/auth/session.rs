use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use service_core::{envelope::ApiResponse, error::AppError};

use crate::{
    dtos::{
        ActivityResponse, LoginRequest, LoginResponse, LogoutAllResponse, RefreshResponse,
        SessionListResponse, SessionView, VerifyResponse,
    },
    middleware::{extract_token, AuthUser, ACCESS_TOKEN_SOURCES, REFRESH_TOKEN_SOURCES},
    models::ClientContext,
    services::{LoginCommand, ServiceError},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; sets accessToken and refreshToken cookies", body = LoginResponse),
        (status = 400, description = "Malformed input", body = ErrorEnvelope),
        (status = 401, description = "Invalid credentials, or a second factor is required", body = ErrorEnvelope),
        (status = 403, description = "Account inactive", body = ErrorEnvelope),
        (status = 429, description = "Too many attempts", body = ErrorEnvelope),
        (status = 503, description = "User store unavailable", body = ErrorEnvelope)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .auth_service
        .login(
            LoginCommand {
                email: req.email,
                password: Password::new(req.password),
                two_factor_code: req.two_factor_code,
            },
            &client,
        )
        .await?;

    let jar = state.cookies.set_tokens(
        jar,
        outcome.tokens.access_token.clone(),
        outcome.tokens.refresh_token,
    );
    let body = LoginResponse {
        user: outcome.user.sanitized(),
        access_token: outcome.tokens.access_token,
        expires_in: outcome.tokens.expires_in,
        session: SessionView::current(&outcome.session),
    };

    Ok((jar, ApiResponse::ok(body, "Login successful")))
}

/// Logout the current session
///
/// Always succeeds and always clears both cookies.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out; cookies cleared")
    ),
    tag = "Authentication",
    security((), ("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    client: ClientContext,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    let access = extract_token(ACCESS_TOKEN_SOURCES, &headers);
    let refresh = extract_token(REFRESH_TOKEN_SOURCES, &headers);

    state
        .auth_service
        .logout(access.as_deref(), refresh.as_deref(), &client)
        .await;

    (
        state.cookies.clear(jar),
        ApiResponse::message("Logged out successfully"),
    )
}

/// Logout from every device
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    responses(
        (status = 200, description = "All sessions revoked; cookies cleared", body = LogoutAllResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout_all(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let sessions_terminated = state.auth_service.logout_all(&auth.claims, &client).await?;

    Ok((
        state.cookies.clear(jar),
        ApiResponse::ok(
            LogoutAllResponse {
                sessions_terminated,
            },
            format!("Logged out from {} session(s)", sessions_terminated),
        ),
    ))
}

/// Exchange the refresh cookie for a new access token
///
/// The refresh token itself is not rotated. An invalid or expired refresh
/// token clears both cookies.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New access token issued; accessToken cookie updated", body = RefreshResponse),
        (status = 401, description = "Missing, invalid or expired refresh token", body = ErrorEnvelope),
        (status = 503, description = "User store unavailable", body = ErrorEnvelope)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let Some(token) = extract_token(REFRESH_TOKEN_SOURCES, &headers) else {
        let err = AppError::Unauthorized("Refresh token required".to_string());
        return (state.cookies.clear(jar), err).into_response();
    };

    match state.auth_service.refresh(&token, &client).await {
        Ok(outcome) => {
            let jar = jar.add(
                state
                    .cookies
                    .access_cookie(outcome.access.access_token.clone()),
            );
            let body = RefreshResponse {
                access_token: outcome.access.access_token,
                expires_in: outcome.access.expires_in,
                session_id: outcome.session.session_id,
            };
            (jar, ApiResponse::ok(body, "Token refreshed")).into_response()
        }
        // Keep the cookies when the failure says nothing about the token.
        Err(err @ (ServiceError::StoreUnavailable(_) | ServiceError::Internal(_))) => {
            AppError::from(err).into_response()
        }
        Err(err) => (state.cookies.clear(jar), AppError::from(err)).into_response(),
    }
}

/// Check the current session
#[utoipa::path(
    get,
    path = "/auth/verify",
    responses(
        (status = 200, description = "Session is valid", body = VerifyResponse),
        (status = 401, description = "Invalid, expired or revoked session", body = ErrorEnvelope)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn verify(AuthUser(auth): AuthUser) -> impl IntoResponse {
    let body = VerifyResponse {
        user: auth.user.sanitized(),
        session: SessionView::current(&auth.session),
        active_sessions: auth.active_sessions,
        expires_at: auth.claims.exp,
    };
    ApiResponse::ok(body, "Session is valid")
}

/// Record user activity on the current session
#[utoipa::path(
    post,
    path = "/auth/activity",
    responses(
        (status = 200, description = "Activity recorded", body = ActivityResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn activity(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let session = state.auth_service.touch_activity(&auth.claims).await?;
    Ok(ApiResponse::ok(
        ActivityResponse {
            session_id: session.session_id,
            last_activity_at: session.last_activity_at,
        },
        "Activity recorded",
    ))
}

/// List the caller's active sessions
#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions, most recent first", body = SessionListResponse),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
) -> impl IntoResponse {
    let sessions = state
        .auth_service
        .list_sessions(&auth.claims)
        .await
        .iter()
        .map(|session| SessionView::new(session, &auth.claims.session_id))
        .collect();

    ApiResponse::ok(SessionListResponse { sessions }, "Sessions retrieved")
}

/// Revoke one of the caller's sessions
#[utoipa::path(
    delete,
    path = "/auth/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session to revoke")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Not authenticated", body = ErrorEnvelope),
        (status = 404, description = "No such session for this user", body = ErrorEnvelope)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn revoke_session(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    client: ClientContext,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .revoke_session(&auth.claims, &session_id, &client)
        .await?;
    Ok(ApiResponse::message("Session revoked"))
}
