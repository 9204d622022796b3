use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Http,
    Ssl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMatchType {
    Contains,
    Exact,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMatch {
    pub match_type: ResponseMatchType,
    pub value: String,
}

/// The four-way expiry classification shared by the SSL prober
/// and the license monitor — both derive it from a day-count against
/// the same warning/critical thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryState {
    Ok,
    Warning,
    Critical,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Website,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Head,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticCheck {
    pub id: String,
    pub name: String,
    pub target_kind: TargetKind,
    pub kind: CheckKind,
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub interval_seconds: u64,
    pub timeout_ms: u64,
    pub expected_status_codes: Vec<u16>,
    pub response_match: Option<ResponseMatch>,
    pub max_response_time_ms: u64,
    pub ssl_enabled: bool,
    /// Warning horizon in days before SSL expiry (default 7).
    pub ssl_expiry_days: i64,
    pub enabled: bool,

    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_message: Option<String>,
    pub ssl_expiry_at: Option<DateTime<Utc>>,
    pub ssl_last_state: Option<ExpiryState>,
    pub ssl_last_reminder_bucket: Option<String>,
    pub ssl_last_renewal_notified_expiry_at: Option<DateTime<Utc>>,
}

impl SyntheticCheck {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_run {
            None => true,
            Some(last_run) => (now - last_run).num_seconds() as u64 >= self.interval_seconds,
        }
    }
}
