pub mod audit_event;
pub mod client;
pub mod session;
pub mod two_factor;
pub mod user;

pub use audit_event::{AuditEvent, AuditEventType, AuditOutcome};
pub use client::ClientContext;
pub use session::{DeviceInfo, Session, SessionStatus};
pub use two_factor::{TwoFactorConfig, TwoFactorMethod, TwoFactorStatus, TwoFactorTransitionError};
pub use user::{NewUser, User, UserProfile, UserRole, UserUpdate};
