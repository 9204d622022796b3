use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Paused,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseAsset {
    pub id: String,
    pub name: String,
    pub renewal_date: DateTime<Utc>,
    pub warning_days: i64,
    pub critical_days: i64,
    pub enabled: bool,
    pub status: LicenseStatus,
    pub last_state: Option<crate::synthetic::ExpiryState>,
    pub last_notified_bucket: Option<String>,
    pub channel_ids: Vec<String>,
}
