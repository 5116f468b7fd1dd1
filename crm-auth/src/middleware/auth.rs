use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use service_core::error::AppError;

use super::client::client_context;
use crate::{services::VerifiedSession, AppState};

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// One place a token may be carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    BearerHeader,
    Cookie(&'static str),
}

impl TokenSource {
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        let token = match self {
            TokenSource::BearerHeader => headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_string()),
            TokenSource::Cookie(name) => CookieJar::from_headers(headers)
                .get(name)
                .map(|cookie| cookie.value().to_string()),
        };
        token.filter(|token| !token.is_empty())
    }
}

/// Sources are tried in order; the first that yields a token wins.
pub const ACCESS_TOKEN_SOURCES: &[TokenSource] = &[
    TokenSource::BearerHeader,
    TokenSource::Cookie(ACCESS_TOKEN_COOKIE),
];
pub const REFRESH_TOKEN_SOURCES: &[TokenSource] = &[TokenSource::Cookie(REFRESH_TOKEN_COOKIE)];

pub fn extract_token(sources: &[TokenSource], headers: &HeaderMap) -> Option<String> {
    sources.iter().find_map(|source| source.extract(headers))
}

/// Middleware to require authentication
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(ACCESS_TOKEN_SOURCES, req.headers())
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    let client = client_context(req.headers(), req.extensions());
    let verified = state.auth_service.verify(&token, &client).await?;

    req.extensions_mut().insert(verified);
    Ok(next.run(req).await)
}

/// The verified caller, as placed by [`auth_middleware`].
pub struct AuthUser(pub VerifiedSession);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let verified = parts
            .extensions
            .get::<VerifiedSession>()
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Auth context missing from request extensions"
                ))
            })?;

        Ok(AuthUser(verified.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("accessToken=from-cookie; refreshToken=r"),
        );

        assert_eq!(
            extract_token(ACCESS_TOKEN_SOURCES, &headers).as_deref(),
            Some("from-header")
        );
        assert_eq!(
            extract_token(REFRESH_TOKEN_SOURCES, &headers).as_deref(),
            Some("r")
        );
    }

    #[test]
    fn cookie_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken=from-cookie"));

        assert_eq!(
            extract_token(ACCESS_TOKEN_SOURCES, &headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken="));

        assert!(extract_token(ACCESS_TOKEN_SOURCES, &headers).is_none());
        assert!(extract_token(REFRESH_TOKEN_SOURCES, &headers).is_none());
    }
}
