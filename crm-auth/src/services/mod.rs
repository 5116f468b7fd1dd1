//! Services layer for crm-auth.
//!
//! Credential hashing lives in `utils`; everything else the auth flows
//! compose is here, with [`AuthService`] on top.

pub mod audit;
pub mod auth;
pub mod error;
pub mod jwt;
pub mod rate_limit;
pub mod session;
pub mod sweeper;
pub mod two_factor;
pub mod user_store;

pub use audit::{AuditLogger, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth::{
    AuthService, LoginCommand, LoginOutcome, RefreshOutcome, RegisterCommand, SecondFactor,
    TwoFactorCheck, VerifiedSession,
};
pub use error::ServiceError;
pub use jwt::{JwtService, TokenClaims, TokenError, TokenType};
pub use rate_limit::{
    AttemptStore, InMemoryAttemptStore, RateLimitDecision, RateLimitPolicy, RateLimiter,
    RedisAttemptStore,
};
pub use session::{InMemorySessionRegistry, SessionRegistry};
pub use sweeper::{SweepReport, Sweeper};
pub use two_factor::{TwoFactorService, TwoFactorSetup};
pub use user_store::{InMemoryUserStore, StoreError, UserStore};
