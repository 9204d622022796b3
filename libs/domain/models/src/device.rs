use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// Maximum length of the rolling heartbeat-timestamp window.
pub const HEARTBEAT_WINDOW: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Server,
    NetworkDevice,
    Website,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    System,
    Docker,
    Asterisk,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Warning,
    NotMonitored,
}

/// Per-device overrides of the fleet-wide defaults carried on
/// `SystemSettings`. `None` means "inherit the default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceOverrides {
    pub offline_warning_threshold_multiplier: Option<f64>,
    pub offline_critical_threshold_multiplier: Option<f64>,
    pub repeat_interval_minutes: Option<i64>,
    pub throttling_duration_minutes: Option<i64>,
    pub sip_rtt_threshold_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub enabled_modules: Vec<Module>,
    pub monitoring_enabled: bool,
    pub monitoring_paused: bool,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    /// Rolling window of the last `HEARTBEAT_WINDOW` heartbeat timestamps,
    /// most recent last.
    pub heartbeat_window: VecDeque<DateTime<Utc>>,
    pub consecutive_missed_messages: u64,
    pub expected_message_interval_seconds: u64,
    /// Per-module last-successful-payload timestamp, used by the
    /// service_down staleness check.
    pub last_successful_metrics: BTreeMap<Module, DateTime<Utc>>,
    pub overrides: DeviceOverrides,
    pub assigned_user_ids: Vec<String>,
    pub hostname: Option<String>,
    pub public_ip: Option<String>,
    pub local_ips: Vec<String>,
}

impl Device {
    pub fn new(device_id: impl Into<DeviceId>, name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            device_type,
            enabled_modules: Vec::new(),
            monitoring_enabled: true,
            monitoring_paused: false,
            status: DeviceStatus::NotMonitored,
            last_seen: None,
            heartbeat_window: VecDeque::with_capacity(HEARTBEAT_WINDOW),
            consecutive_missed_messages: 0,
            expected_message_interval_seconds: 15,
            last_successful_metrics: BTreeMap::new(),
            overrides: DeviceOverrides::default(),
            assigned_user_ids: Vec::new(),
            hostname: None,
            public_ip: None,
            local_ips: Vec::new(),
        }
    }

    pub fn is_monitorable(&self) -> bool {
        self.monitoring_enabled && !self.monitoring_paused
    }

    /// Pushes `at` onto the rolling heartbeat window, evicting the oldest
    /// entry once the window exceeds `HEARTBEAT_WINDOW`.
    pub fn push_heartbeat(&mut self, at: DateTime<Utc>) {
        if self.heartbeat_window.len() == HEARTBEAT_WINDOW {
            self.heartbeat_window.pop_front();
        }
        self.heartbeat_window.push_back(at);
        self.last_seen = Some(at);
        self.consecutive_missed_messages = 0;
    }

    pub fn has_module(&self, module: Module) -> bool {
        self.enabled_modules.contains(&module)
    }
}
