use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::Module;
use crate::ids::DeviceId;

/// Closed sum type replacing a polymorphic `check_type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Cpu,
    Memory,
    Disk,
    Bandwidth,
    Utilization,
    /// `sip` is accepted as a deserialization alias for persisted rules
    /// seeded under the old name.
    #[serde(alias = "sip")]
    SipRtt,
    SipRegistration,
    ContainerStatus,
    Custom,
}

impl CheckType {
    /// The device module this check type requires to be enabled.
    pub fn required_module(self) -> Option<Module> {
        match self {
            CheckType::Cpu | CheckType::Memory | CheckType::Disk => Some(Module::System),
            CheckType::Bandwidth | CheckType::Utilization => Some(Module::Network),
            CheckType::SipRtt | CheckType::SipRegistration => Some(Module::Asterisk),
            CheckType::ContainerStatus => Some(Module::Docker),
            CheckType::Custom => None,
        }
    }

    /// True for checks where a larger value is worse; false for checks
    /// where a smaller value is worse.
    pub fn higher_is_worse(self) -> bool {
        !matches!(self, CheckType::SipRegistration)
    }

    /// Canonical snake_case label used as `ActiveKey.specific_service` and
    /// for the rule-still-exists lookup in the alert engine's
    /// monitored-ness re-validation.
    pub fn label(self) -> &'static str {
        match self {
            CheckType::Cpu => "cpu",
            CheckType::Memory => "memory",
            CheckType::Disk => "disk",
            CheckType::Bandwidth => "bandwidth",
            CheckType::Utilization => "utilization",
            CheckType::SipRtt => "sip_rtt",
            CheckType::SipRegistration => "sip_registration",
            CheckType::ContainerStatus => "container_status",
            CheckType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckThresholds {
    pub warning: f64,
    pub critical: f64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringCheck {
    pub id: String,
    pub device_id: DeviceId,
    pub check_type: CheckType,
    /// Mount path, interface name, AOR, or container name, depending on
    /// `check_type`.
    pub target: Option<String>,
    pub thresholds: CheckThresholds,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub last_value: Option<f64>,
    pub last_state: CheckState,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}

impl MonitoringCheck {
    pub fn new(id: impl Into<String>, device_id: DeviceId, check_type: CheckType, thresholds: CheckThresholds) -> Self {
        Self {
            id: id.into(),
            device_id,
            check_type,
            target: None,
            thresholds,
            interval_seconds: 30,
            enabled: true,
            last_value: None,
            last_state: CheckState::Unknown,
            last_evaluated_at: None,
            last_message: None,
        }
    }
}
