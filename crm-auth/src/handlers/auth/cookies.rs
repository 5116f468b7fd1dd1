use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config::AuthConfig;
use crate::middleware::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};

/// The refresh cookie is only ever needed by `/auth/*` routes.
const REFRESH_COOKIE_PATH: &str = "/auth";

/// Attributes of the two HTTP-only token cookies.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    secure: bool,
    domain: Option<String>,
    access_max_age: time::Duration,
    refresh_max_age: time::Duration,
}

impl CookiePolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            secure: config.cookies.secure,
            domain: config.cookies.domain.clone(),
            access_max_age: time::Duration::minutes(config.jwt.access_token_ttl_minutes),
            refresh_max_age: time::Duration::days(config.jwt.refresh_token_ttl_days),
        }
    }

    fn cookie(
        &self,
        name: &'static str,
        value: String,
        path: &'static str,
        same_site: SameSite,
        max_age: time::Duration,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name, value))
            .path(path)
            .http_only(true)
            .secure(self.secure)
            .same_site(same_site)
            .max_age(max_age);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    pub fn access_cookie(&self, token: String) -> Cookie<'static> {
        self.cookie(
            ACCESS_TOKEN_COOKIE,
            token,
            "/",
            SameSite::Lax,
            self.access_max_age,
        )
    }

    pub fn refresh_cookie(&self, token: String) -> Cookie<'static> {
        self.cookie(
            REFRESH_TOKEN_COOKIE,
            token,
            REFRESH_COOKIE_PATH,
            SameSite::Strict,
            self.refresh_max_age,
        )
    }

    pub fn set_tokens(&self, jar: CookieJar, access: String, refresh: String) -> CookieJar {
        jar.add(self.access_cookie(access))
            .add(self.refresh_cookie(refresh))
    }

    /// Expire both cookies (Max-Age=0) with the attributes they were set with.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.cookie(
            ACCESS_TOKEN_COOKIE,
            String::new(),
            "/",
            SameSite::Lax,
            time::Duration::ZERO,
        ))
        .add(self.cookie(
            REFRESH_TOKEN_COOKIE,
            String::new(),
            REFRESH_COOKIE_PATH,
            SameSite::Strict,
            time::Duration::ZERO,
        ))
    }
}
