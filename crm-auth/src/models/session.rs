use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One authenticated device/login instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Device details captured at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
}

/// Registry answer for a presented session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active(Session),
    /// Explicitly ended by logout, logout-all or revocation.
    Revoked,
    /// Never seen, e.g. the registry was cleared by a restart.
    Unknown,
}
