pub mod account;
pub mod cookies;
pub mod registration;
pub mod session;
pub mod two_factor;

pub use account::{change_password, complete_onboarding};
pub use cookies::CookiePolicy;
pub use registration::register;
pub use session::{activity, list_sessions, login, logout, logout_all, refresh, revoke_session, verify};
