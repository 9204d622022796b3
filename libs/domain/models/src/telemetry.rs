use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// Raw `system` module payload, as published on
/// `iotmonitor/device/{id}/metrics/system`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetricsPayload {
    pub cpu_usage: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub cpu_load: Option<f64>,
    pub memory_usage: Option<f64>,
    pub memory_used_percent: Option<f64>,
    pub memory_total: Option<u64>,
    pub disk_usage: Option<f64>,
    pub disks: Vec<DiskEntry>,
    pub hostname: Option<String>,
    pub disk_total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskEntry {
    pub mount: Option<String>,
    pub path: Option<String>,
    pub name: Option<String>,
    pub device: Option<String>,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMetricsPayload {
    pub public_ip: Option<String>,
    pub local_ips: Vec<String>,
    pub interfaces: Vec<NetworkInterface>,
    pub ping_results: Vec<PingResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub rx_bps: f64,
    pub tx_bps: f64,
    pub utilization_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    pub target: String,
    pub reachable: bool,
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerMetricsPayload {
    pub containers: Vec<ContainerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEntry {
    pub name: String,
    pub state: Option<String>,
    pub status: Option<String>,
    pub health: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsteriskMetricsPayload {
    pub contacts: Vec<SipContact>,
    pub registrations: Vec<SipRegistrationEntry>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipContact {
    pub aor: String,
    pub status: String,
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipRegistrationEntry {
    pub name: String,
    pub status: String,
}

/// Tagged union over the four ingest module payloads. Consolidation merges one of these into the
/// device's current `Telemetry` record per each module's own merge rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum ModulePayload {
    System(SystemMetricsPayload),
    Network(NetworkMetricsPayload),
    Docker(DockerMetricsPayload),
    Asterisk(AsteriskMetricsPayload),
}

/// The module-keyed accumulation of non-scalar data for one consolidated
/// Telemetry record. `docker` is replaced wholesale on each docker
/// payload; `asterisk`'s fields are merged in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryExtra {
    pub interfaces: Vec<NetworkInterface>,
    pub ping_results: Vec<PingResult>,
    pub docker: Option<DockerMetricsPayload>,
    pub contacts: Vec<SipContact>,
    pub registrations: Vec<SipRegistrationEntry>,
    pub asterisk_summary: Option<String>,
    pub disks: Vec<DiskEntry>,
}

impl DiskEntry {
    /// True if `target` names this entry via its mount, path, name, or
    /// device field — the lookup order the disk rule's scalar-extraction
    /// table uses.
    pub fn matches_target(&self, target: &str) -> bool {
        self.mount.as_deref() == Some(target)
            || self.path.as_deref() == Some(target)
            || self.name.as_deref() == Some(target)
            || self.device.as_deref() == Some(target)
    }
}

/// Normalized scalars plus the module-keyed `extra` blob. At most one of
/// these exists per device per `CONSOLIDATION_WINDOW`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub network_in_bps: Option<f64>,
    pub network_out_bps: Option<f64>,
    pub extra: TelemetryExtra,
}

impl Telemetry {
    pub fn new(device_id: DeviceId, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            timestamp,
            cpu_usage: None,
            memory_usage: None,
            disk_usage: None,
            network_in_bps: None,
            network_out_bps: None,
            extra: TelemetryExtra::default(),
        }
    }
}
