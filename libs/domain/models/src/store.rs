//! Persistence-trait seams. Storage is any document store supporting
//! compound indexes and atomic updates; these traits are narrow enough
//! that `fleetwatch-infra-store`'s in-memory implementation and a future
//! real database adapter are interchangeable behind them.

use async_trait::async_trait;

use crate::alert::{ActiveKey, AlertTracking};
use crate::channel::NotificationChannel;
use crate::device::Device;
use crate::error::StoreError;
use crate::ids::DeviceId;
use crate::incident::{Incident, TargetType};
use crate::license::LicenseAsset;
use crate::rule::MonitoringCheck;
use crate::settings::SystemSettings;
use crate::synthetic::SyntheticCheck;
use crate::telemetry::Telemetry;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, device_id: &DeviceId) -> Result<Device, StoreError>;
    async fn upsert(&self, device: Device) -> Result<(), StoreError>;
    async fn list(&self) -> Vec<Device>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_for_device(&self, device_id: &DeviceId) -> Vec<MonitoringCheck>;
    async fn upsert(&self, check: MonitoringCheck) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Returns the most recent Telemetry record for `device_id`, if any.
    async fn latest(&self, device_id: &DeviceId) -> Option<Telemetry>;
    async fn upsert(&self, telemetry: Telemetry) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn find_open(&self, key: &ActiveKey) -> Option<AlertTracking>;
    async fn upsert(&self, alert: AlertTracking) -> Result<(), StoreError>;
    async fn list_open(&self) -> Vec<AlertTracking>;
    async fn list_open_for_device(&self, device_id: &DeviceId) -> Vec<AlertTracking>;
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn find_open(&self, target_type: TargetType, target_id: &str, summary: &str) -> Option<Incident>;
    async fn upsert(&self, incident: Incident) -> Result<(), StoreError>;
    async fn list_open(&self) -> Vec<Incident>;
}

#[async_trait]
pub trait SyntheticCheckStore: Send + Sync {
    async fn list_enabled(&self) -> Vec<SyntheticCheck>;
    async fn upsert(&self, check: SyntheticCheck) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn list_enabled(&self) -> Vec<LicenseAsset>;
    async fn upsert(&self, license: LicenseAsset) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list_enabled(&self) -> Vec<NotificationChannel>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> SystemSettings;
    async fn upsert(&self, settings: SystemSettings) -> Result<(), StoreError>;
}
