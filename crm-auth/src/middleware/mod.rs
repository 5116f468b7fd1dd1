pub mod auth;
pub mod client;
pub mod rate_limit;

pub use auth::{
    auth_middleware, extract_token, AuthUser, TokenSource, ACCESS_TOKEN_COOKIE,
    ACCESS_TOKEN_SOURCES, REFRESH_TOKEN_COOKIE, REFRESH_TOKEN_SOURCES,
};
pub use client::{client_context, DEVICE_ID_HEADER};
pub use rate_limit::rate_limit_middleware;
