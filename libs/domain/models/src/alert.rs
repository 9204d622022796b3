use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Offline,
    Online,
    ServiceDown,
    SipIssue,
    HighLatency,
    Threshold,
    RuleViolation,
    IpChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Ordinal rank used by the trigger path's escalation guard: a
    /// re-trigger only escalates severity when the new rank is higher.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    New,
    Throttling,
    HourlyOnly,
    Resolved,
}

/// The 4-tuple used to deduplicate alerts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveKey {
    pub device_id: DeviceId,
    pub alert_type: AlertType,
    pub specific_service: Option<String>,
    pub specific_endpoint: Option<String>,
}

impl ActiveKey {
    pub fn new(device_id: DeviceId, alert_type: AlertType) -> Self {
        Self {
            device_id,
            alert_type,
            specific_service: None,
            specific_endpoint: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.specific_service = Some(service.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.specific_endpoint = Some(endpoint.into());
        self
    }
}

/// Cadence governing reminder emissions for one alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThrottlePolicy {
    pub repeat_minutes: i64,
    /// 0 means "never transition to hourly_only" (pager-style alerting;
    /// see DESIGN.md).
    pub throttle_duration_minutes: i64,
}

impl ThrottlePolicy {
    pub fn repeat(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.repeat_minutes)
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        if self.throttle_duration_minutes > 0 {
            Some(chrono::Duration::minutes(self.throttle_duration_minutes))
        } else {
            None
        }
    }
}

/// A small closed schema for the alert's contextual details, replacing
/// the source's free-form `details` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertDetails {
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub unit: Option<String>,
    pub message: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl AlertDetails {
    /// Merge semantics for a re-trigger on an already-open active-key.
    /// Newer non-`None` fields win; `extra` entries are merged key-wise.
    pub fn merge_from(&mut self, other: &AlertDetails) {
        if other.value.is_some() {
            self.value = other.value;
        }
        if other.threshold.is_some() {
            self.threshold = other.threshold;
        }
        if other.unit.is_some() {
            self.unit = other.unit.clone();
        }
        if other.message.is_some() {
            self.message = other.message.clone();
        }
        for (k, v) in &other.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTracking {
    pub id: String,
    pub active_key: ActiveKey,
    pub severity: Severity,
    pub state: AlertState,
    pub first_triggered: DateTime<Utc>,
    pub last_notified: DateTime<Utc>,
    pub notification_count: u64,
    pub throttling: ThrottlePolicy,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_reason: Option<String>,
    pub details: AlertDetails,
}

impl AlertTracking {
    pub fn is_open(&self) -> bool {
        self.state != AlertState::Resolved
    }
}
