use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alert::{AlertType, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Slack,
    Email,
    Webhook,
    Sms,
    Whatsapp,
    CallApi,
}

/// A filter over alert types that treats an empty list as "match nothing"
/// and the literal entry `"all"` as "match anything".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertTypeFilter(pub Vec<String>);

impl AlertTypeFilter {
    pub fn matches(&self, alert_type: AlertType) -> bool {
        if self.0.is_empty() {
            return false;
        }
        let needle = format!("{alert_type:?}").to_lowercase();
        self.0.iter().any(|v| v == "all" || v.to_lowercase() == needle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub channel_type: ChannelType,
    pub enabled: bool,
    /// At most one enabled channel may have `is_default = true`.
    pub is_default: bool,
    pub alert_types: AlertTypeFilter,
    pub severity_levels: Vec<Severity>,
    pub device_filters: Vec<String>,
    pub config: BTreeMap<String, String>,
}

impl NotificationChannel {
    pub fn matches_severity(&self, severity: Severity) -> bool {
        self.severity_levels.is_empty() || self.severity_levels.contains(&severity)
    }
}
