use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::client::client_context;
use crate::services::{RateLimitDecision, RateLimiter, ServiceError};

/// Count the request against `limiter` and refuse it while the caller is blocked.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let client = client_context(request.headers(), request.extensions());

    match limiter.check(&client).await {
        Ok(RateLimitDecision::Allowed { .. }) => Ok(next.run(request).await),
        Ok(RateLimitDecision::Blocked { retry_after }) => {
            Err(ServiceError::RateLimited { retry_after }.into())
        }
        Err(e) => Err(ServiceError::StoreUnavailable(e).into()),
    }
}
