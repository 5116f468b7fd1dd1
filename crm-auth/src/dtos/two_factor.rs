use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::TwoFactorStatus;
use crate::services::TwoFactorSetup;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetupResponse {
    /// PNG data URL of the provisioning QR code.
    pub qr_code_url: String,
    #[schema(example = "JBSW Y3DP EHPK 3PXP")]
    pub manual_entry_key: String,
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
    pub status: TwoFactorStatus,
}

impl From<TwoFactorSetup> for TwoFactorSetupResponse {
    fn from(setup: TwoFactorSetup) -> Self {
        Self {
            qr_code_url: setup.qr_code_url,
            manual_entry_key: setup.manual_entry_key,
            otpauth_url: setup.otpauth_url,
            backup_codes: setup.backup_codes,
            status: TwoFactorStatus::PendingSetup,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TwoFactorCodeRequest {
    /// Six-digit TOTP code, or a backup code where accepted.
    #[validate(length(min = 6, max = 32, message = "Code must be 6 to 32 characters"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorVerifyResponse {
    pub status: TwoFactorStatus,
    /// `totp` or `backup_code`.
    #[schema(example = "totp")]
    pub method: String,
    #[schema(example = 10)]
    pub backup_codes_remaining: usize,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DisableTwoFactorRequest {
    #[validate(length(min = 6, max = 32, message = "Code must be 6 to 32 characters"))]
    #[schema(example = "123456")]
    pub code: String,

    /// Keep the secret and backup codes so a later verify can resume.
    #[serde(default)]
    pub temporary: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorStatusResponse {
    pub status: TwoFactorStatus,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}
