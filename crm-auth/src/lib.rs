pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    http_trace_layer, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::{sync::Arc, time::Duration};
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AuthConfig, Environment, SwaggerMode};
use crate::handlers::auth::CookiePolicy;
use crate::services::{
    AttemptStore, AuditLogger, AuditSink, AuthService, InMemorySessionRegistry, RateLimitPolicy,
    RateLimiter, Sweeper, UserStore,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::session::login,
        handlers::auth::session::logout,
        handlers::auth::session::logout_all,
        handlers::auth::session::refresh,
        handlers::auth::session::verify,
        handlers::auth::session::activity,
        handlers::auth::session::list_sessions,
        handlers::auth::session::revoke_session,
        handlers::auth::account::change_password,
        handlers::auth::account::complete_onboarding,
        handlers::auth::two_factor::setup,
        handlers::auth::two_factor::verify,
        handlers::auth::two_factor::disable,
        handlers::auth::two_factor::regenerate_backup_codes,
    ),
    components(
        schemas(
            dtos::ErrorEnvelope,
            dtos::HealthResponse,
            dtos::RegisterRequest,
            dtos::RegisterResponse,
            dtos::LoginRequest,
            dtos::LoginResponse,
            dtos::SessionView,
            dtos::RefreshResponse,
            dtos::VerifyResponse,
            dtos::LogoutAllResponse,
            dtos::ActivityResponse,
            dtos::SessionListResponse,
            dtos::ChangePasswordRequest,
            dtos::ChangePasswordResponse,
            dtos::OnboardingResponse,
            dtos::TwoFactorSetupResponse,
            dtos::TwoFactorCodeRequest,
            dtos::TwoFactorVerifyResponse,
            dtos::DisableTwoFactorRequest,
            dtos::TwoFactorStatusResponse,
            dtos::BackupCodesResponse,
            models::UserProfile,
            models::UserRole,
            models::TwoFactorStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login, logout and token lifecycle"),
        (name = "Sessions", description = "Session listing, revocation and activity"),
        (name = "Account", description = "Password and onboarding"),
        (name = "Two-Factor", description = "TOTP enrolment and backup codes"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub auth_service: AuthService,
    pub attempts: Arc<dyn AttemptStore>,
    pub register_rate_limiter: RateLimiter,
    pub cookies: CookiePolicy,
}

impl AppState {
    /// Wire the auth core over the given stores. Sessions are kept in process.
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        attempts: Arc<dyn AttemptStore>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, anyhow::Error> {
        let sessions = Arc::new(InMemorySessionRegistry::new(chrono::Duration::days(
            config.jwt.refresh_token_ttl_days,
        )));
        let login_rate_limiter = RateLimiter::new(
            "login",
            RateLimitPolicy::from(config.rate_limit.login),
            attempts.clone(),
        );
        let register_rate_limiter = RateLimiter::new(
            "register",
            RateLimitPolicy::from(config.rate_limit.register),
            attempts.clone(),
        );
        let audit = AuditLogger::new(audit_sink, Duration::from_millis(config.store.timeout_ms));

        let auth_service =
            AuthService::new(&config, users, sessions, login_rate_limiter, audit)?;

        Ok(Self {
            cookies: CookiePolicy::from_config(&config),
            config,
            auth_service,
            attempts,
            register_rate_limiter,
        })
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.attempts.clone(),
            self.auth_service.jwt().clone(),
            self.auth_service.sessions().clone(),
        )
    }
}

fn cors_layer(config: &AuthConfig) -> Result<CorsLayer, AppError> {
    let origins = &config.security.allowed_origins;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        // Credentialed CORS cannot use a literal wildcard.
        AllowOrigin::mirror_request()
    } else {
        let parsed = origins
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>().map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(parsed)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middleware::DEVICE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([header::RETRY_AFTER, HeaderName::from_static(REQUEST_ID_HEADER)]))
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let register_route = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            middleware::rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route("/auth/verify", get(handlers::auth::verify))
        .route("/auth/activity", post(handlers::auth::activity))
        .route("/auth/sessions", get(handlers::auth::list_sessions))
        .route(
            "/auth/sessions/:session_id",
            delete(handlers::auth::revoke_session),
        )
        .route("/auth/password", post(handlers::auth::change_password))
        .route(
            "/auth/onboarding/complete",
            post(handlers::auth::complete_onboarding),
        )
        .route("/auth/2fa/setup", post(handlers::auth::two_factor::setup))
        .route("/auth/2fa/verify", post(handlers::auth::two_factor::verify))
        .route("/auth/2fa/disable", post(handlers::auth::two_factor::disable))
        .route(
            "/auth/2fa/backup-codes",
            post(handlers::auth::two_factor::regenerate_backup_codes),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new().route("/health", get(health_check));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };
    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let app = app
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .merge(register_route)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(http_trace_layer())
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config)?);

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Rate-limit store unreachable", body = ErrorEnvelope)
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<dtos::HealthResponse>, AppError> {
    state.attempts.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Rate limit store health check failed");
        AppError::ServiceUnavailable {
            message: "Rate limit store unavailable".to_string(),
            retry_after: Some(5),
        }
    })?;

    Ok(Json(dtos::HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: state.config.service_version.clone(),
    }))
}
