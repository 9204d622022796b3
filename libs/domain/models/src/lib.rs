//! Entity types and persistence-trait seams shared by every FleetWatch
//! component.

pub mod alert;
pub mod channel;
pub mod device;
pub mod error;
pub mod ids;
pub mod incident;
pub mod license;
pub mod rule;
pub mod settings;
pub mod store;
pub mod synthetic;
pub mod telemetry;

pub use alert::{ActiveKey, AlertDetails, AlertState, AlertTracking, AlertType, Severity, ThrottlePolicy};
pub use channel::{ChannelType, NotificationChannel};
pub use device::{Device, DeviceOverrides, DeviceStatus, DeviceType, Module};
pub use error::StoreError;
pub use ids::DeviceId;
pub use incident::{Incident, IncidentStatus, IncidentUpdate, TargetType};
pub use license::{LicenseAsset, LicenseStatus};
pub use rule::{CheckState, CheckType, MonitoringCheck};
pub use settings::SystemSettings;
pub use synthetic::{CheckKind, ExpiryState, HttpMethod, ResponseMatch, ResponseMatchType, SyntheticCheck, TargetKind};
pub use telemetry::{
    AsteriskMetricsPayload, DockerMetricsPayload, ModulePayload, NetworkMetricsPayload, SystemMetricsPayload, Telemetry,
    TelemetryExtra,
};
