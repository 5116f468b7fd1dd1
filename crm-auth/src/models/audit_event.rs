//! Audit event model - security-relevant auth activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::ClientContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    Logout,
    LogoutAll,
    TokenRefreshed,
    SessionRevoked,
    UserRegistered,
    PasswordChanged,
    OnboardingCompleted,
    TwoFactorSetupStarted,
    TwoFactorEnabled,
    TwoFactorDisabled,
    TwoFactorSuspended,
    TwoFactorFailed,
    BackupCodeUsed,
    BackupCodesRegenerated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailure => "login_failure",
            AuditEventType::Logout => "logout",
            AuditEventType::LogoutAll => "logout_all",
            AuditEventType::TokenRefreshed => "token_refreshed",
            AuditEventType::SessionRevoked => "session_revoked",
            AuditEventType::UserRegistered => "user_registered",
            AuditEventType::PasswordChanged => "password_changed",
            AuditEventType::OnboardingCompleted => "onboarding_completed",
            AuditEventType::TwoFactorSetupStarted => "two_factor_setup_started",
            AuditEventType::TwoFactorEnabled => "two_factor_enabled",
            AuditEventType::TwoFactorDisabled => "two_factor_disabled",
            AuditEventType::TwoFactorSuspended => "two_factor_suspended",
            AuditEventType::TwoFactorFailed => "two_factor_failed",
            AuditEventType::BackupCodeUsed => "backup_code_used",
            AuditEventType::BackupCodesRegenerated => "backup_codes_regenerated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Immutable audit entry. Actor fields are best effort: on failed logins only
/// the attempted email may be known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: AuditEventType,
    pub outcome: AuditOutcome,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, outcome: AuditOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            outcome,
            user_id: None,
            email: None,
            ip_address: None,
            user_agent: None,
            details: serde_json::Value::Null,
            created_utc: Utc::now(),
        }
    }

    pub fn success(event_type: AuditEventType) -> Self {
        Self::new(event_type, AuditOutcome::Success)
    }

    pub fn failure(event_type: AuditEventType) -> Self {
        Self::new(event_type, AuditOutcome::Failure)
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn client(mut self, client: &ClientContext) -> Self {
        self.ip_address = Some(client.ip_address.clone());
        self.user_agent = client.user_agent.clone();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuditOutcome::Success
    }
}
