//! User record as seen by the auth core. Persistence belongs to the user store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::two_factor::{TwoFactorConfig, TwoFactorStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    Agent,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: UserRole,
    pub organization_id: String,
    pub is_active: bool,
    pub is_onboarding_completed: bool,
    #[serde(default = "TwoFactorConfig::default")]
    pub two_factor: TwoFactorConfig,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(new_user: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email: new_user.email,
            name: new_user.name,
            password_hash: new_user.password_hash,
            role: new_user.role,
            organization_id: new_user.organization_id,
            is_active: true,
            is_onboarding_completed: false,
            two_factor: TwoFactorConfig::Disabled,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True only when logins must present a second factor.
    pub fn two_factor_enabled(&self) -> bool {
        self.two_factor.is_enforced()
    }

    /// Convert to the public shape (no hash, no 2FA secret).
    pub fn sanitized(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

/// Fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: UserRole,
    pub organization_id: String,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub password_hash: Option<String>,
    pub is_active: Option<bool>,
    pub is_onboarding_completed: Option<bool>,
    pub two_factor: Option<TwoFactorConfig>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserUpdate {
    pub fn apply(self, user: &mut User) {
        if let Some(hash) = self.password_hash {
            user.password_hash = hash;
        }
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
        if let Some(done) = self.is_onboarding_completed {
            user.is_onboarding_completed = done;
        }
        if let Some(two_factor) = self.two_factor {
            user.two_factor = two_factor;
        }
        if let Some(at) = self.last_login_at {
            user.last_login_at = Some(at);
        }
        user.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "a@b.com")]
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub organization_id: String,
    pub is_onboarding_completed: bool,
    pub two_factor_enabled: bool,
    pub two_factor_status: TwoFactorStatus,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            organization_id: user.organization_id.clone(),
            is_onboarding_completed: user.is_onboarding_completed,
            two_factor_enabled: user.two_factor_enabled(),
            two_factor_status: user.two_factor.status(),
            last_login_at: user.last_login_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new(NewUser {
            email: "a@b.com".to_string(),
            name: Some("Ada".to_string()),
            password_hash: "$argon2id$stub".to_string(),
            role: UserRole::Agent,
            organization_id: "org-1".to_string(),
        })
    }

    #[test]
    fn new_users_are_active_without_two_factor() {
        let user = user();
        assert!(user.is_active);
        assert!(!user.is_onboarding_completed);
        assert!(!user.two_factor_enabled());
    }

    #[test]
    fn update_only_touches_given_fields() {
        let mut user = user();
        let before = user.password_hash.clone();
        UserUpdate {
            is_onboarding_completed: Some(true),
            ..Default::default()
        }
        .apply(&mut user);

        assert!(user.is_onboarding_completed);
        assert_eq!(user.password_hash, before);
        assert!(user.is_active);
    }

    #[test]
    fn profile_hides_secrets() {
        let profile = serde_json::to_value(user().sanitized()).unwrap();
        assert!(profile.get("passwordHash").is_none());
        assert!(profile.get("twoFactor").is_none());
        assert_eq!(profile["role"], "agent");
        assert_eq!(profile["twoFactorStatus"], "disabled");
    }
}
