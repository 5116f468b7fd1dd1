//! Second-factor configuration carried on the user record.
//!
//! The stored blob is a tagged variant, so an enabled config without a secret
//! cannot be represented and malformed blobs fail at deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorMethod {
    Totp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorStatus {
    Disabled,
    PendingSetup,
    Enabled,
    TemporarilyDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TwoFactorConfig {
    #[default]
    Disabled,
    PendingSetup {
        method: TwoFactorMethod,
        secret: String,
        backup_codes: Vec<String>,
        created_at: DateTime<Utc>,
    },
    Enabled {
        method: TwoFactorMethod,
        secret: String,
        backup_codes: Vec<String>,
        enabled_at: DateTime<Utc>,
    },
    TemporarilyDisabled {
        method: TwoFactorMethod,
        secret: String,
        backup_codes: Vec<String>,
        enabled_at: DateTime<Utc>,
        suspended_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TwoFactorTransitionError {
    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,
    #[error("two-factor authentication is not enabled")]
    NotEnabled,
}

impl TwoFactorConfig {
    pub fn pending(secret: String, backup_codes: Vec<String>) -> Self {
        TwoFactorConfig::PendingSetup {
            method: TwoFactorMethod::Totp,
            secret,
            backup_codes,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TwoFactorStatus {
        match self {
            TwoFactorConfig::Disabled => TwoFactorStatus::Disabled,
            TwoFactorConfig::PendingSetup { .. } => TwoFactorStatus::PendingSetup,
            TwoFactorConfig::Enabled { .. } => TwoFactorStatus::Enabled,
            TwoFactorConfig::TemporarilyDisabled { .. } => TwoFactorStatus::TemporarilyDisabled,
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, TwoFactorConfig::Enabled { .. })
    }

    pub fn secret(&self) -> Option<&str> {
        match self {
            TwoFactorConfig::Disabled => None,
            TwoFactorConfig::PendingSetup { secret, .. }
            | TwoFactorConfig::Enabled { secret, .. }
            | TwoFactorConfig::TemporarilyDisabled { secret, .. } => Some(secret),
        }
    }

    pub fn backup_codes(&self) -> &[String] {
        match self {
            TwoFactorConfig::Disabled => &[],
            TwoFactorConfig::PendingSetup { backup_codes, .. }
            | TwoFactorConfig::Enabled { backup_codes, .. }
            | TwoFactorConfig::TemporarilyDisabled { backup_codes, .. } => backup_codes,
        }
    }

    /// Pending or suspended -> enabled. Callers must have verified a code
    /// against `secret()` first.
    pub fn activate(self, now: DateTime<Utc>) -> Result<Self, TwoFactorTransitionError> {
        match self {
            TwoFactorConfig::PendingSetup {
                method,
                secret,
                backup_codes,
                ..
            } => Ok(TwoFactorConfig::Enabled {
                method,
                secret,
                backup_codes,
                enabled_at: now,
            }),
            TwoFactorConfig::TemporarilyDisabled {
                method,
                secret,
                backup_codes,
                ..
            } => Ok(TwoFactorConfig::Enabled {
                method,
                secret,
                backup_codes,
                enabled_at: now,
            }),
            TwoFactorConfig::Enabled { .. } => Err(TwoFactorTransitionError::AlreadyEnabled),
            TwoFactorConfig::Disabled => Err(TwoFactorTransitionError::NotEnabled),
        }
    }

    /// Enabled -> temporarily disabled, keeping the secret for later resumption.
    pub fn suspend(self, now: DateTime<Utc>) -> Result<Self, TwoFactorTransitionError> {
        match self {
            TwoFactorConfig::Enabled {
                method,
                secret,
                backup_codes,
                enabled_at,
            } => Ok(TwoFactorConfig::TemporarilyDisabled {
                method,
                secret,
                backup_codes,
                enabled_at,
                suspended_at: now,
            }),
            _ => Err(TwoFactorTransitionError::NotEnabled),
        }
    }

    pub fn with_backup_codes(self, codes: Vec<String>) -> Self {
        match self {
            TwoFactorConfig::Disabled => TwoFactorConfig::Disabled,
            TwoFactorConfig::PendingSetup {
                method,
                secret,
                created_at,
                ..
            } => TwoFactorConfig::PendingSetup {
                method,
                secret,
                backup_codes: codes,
                created_at,
            },
            TwoFactorConfig::Enabled {
                method,
                secret,
                enabled_at,
                ..
            } => TwoFactorConfig::Enabled {
                method,
                secret,
                backup_codes: codes,
                enabled_at,
            },
            TwoFactorConfig::TemporarilyDisabled {
                method,
                secret,
                enabled_at,
                suspended_at,
                ..
            } => TwoFactorConfig::TemporarilyDisabled {
                method,
                secret,
                backup_codes: codes,
                enabled_at,
                suspended_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> TwoFactorConfig {
        TwoFactorConfig::pending("JBSWY3DPEHPK3PXP".to_string(), vec!["ABCD2345".to_string()])
    }

    #[test]
    fn pending_is_not_enforced() {
        let config = pending();
        assert_eq!(config.status(), TwoFactorStatus::PendingSetup);
        assert!(!config.is_enforced());
    }

    #[test]
    fn activation_keeps_secret_and_codes() {
        let enabled = pending().activate(Utc::now()).unwrap();
        assert!(enabled.is_enforced());
        assert_eq!(enabled.secret(), Some("JBSWY3DPEHPK3PXP"));
        assert_eq!(enabled.backup_codes(), ["ABCD2345".to_string()]);
    }

    #[test]
    fn disabled_cannot_be_activated() {
        assert_eq!(
            TwoFactorConfig::Disabled.activate(Utc::now()),
            Err(TwoFactorTransitionError::NotEnabled)
        );
    }

    #[test]
    fn suspend_then_resume() {
        let suspended = pending()
            .activate(Utc::now())
            .unwrap()
            .suspend(Utc::now())
            .unwrap();
        assert_eq!(suspended.status(), TwoFactorStatus::TemporarilyDisabled);
        assert!(!suspended.is_enforced());

        let resumed = suspended.activate(Utc::now()).unwrap();
        assert!(resumed.is_enforced());
    }

    #[test]
    fn pending_cannot_be_suspended() {
        assert_eq!(
            pending().suspend(Utc::now()),
            Err(TwoFactorTransitionError::NotEnabled)
        );
    }

    #[test]
    fn stored_blob_is_tagged_by_status() {
        let blob = serde_json::to_value(pending()).unwrap();
        assert_eq!(blob["status"], "pending_setup");
        assert_eq!(blob["method"], "totp");

        let back: TwoFactorConfig = serde_json::from_value(blob).unwrap();
        assert_eq!(back.status(), TwoFactorStatus::PendingSetup);
    }

    #[test]
    fn enabled_blob_without_secret_is_rejected() {
        let blob = serde_json::json!({
            "status": "enabled",
            "method": "totp",
            "backup_codes": [],
            "enabled_at": "2024-01-01T00:00:00Z"
        });
        assert!(serde_json::from_value::<TwoFactorConfig>(blob).is_err());
    }
}
