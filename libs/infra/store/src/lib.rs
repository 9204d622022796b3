//! A single in-process implementation of every store trait in
//! `fleetwatch-domain-models::store`, standing in for whatever document
//! store with compound indexes and atomic updates a production
//! deployment would point at instead.
//!
//! Active-key and incident-key uniqueness is enforced by
//! only ever keeping non-resolved rows in the open-index maps: an upsert
//! of a resolved row removes it from the index instead of leaving a
//! second entry behind.

use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;

use fleetwatch_domain_models::{
    store::{
        AlertStore, ChannelStore, DeviceStore, IncidentStore, LicenseStore, RuleStore,
        SettingsStore, SyntheticCheckStore, TelemetryStore,
    },
    ActiveKey, AlertTracking, Device, DeviceId, Incident, LicenseAsset, MonitoringCheck,
    NotificationChannel, StoreError, SyntheticCheck, SystemSettings, TargetType, Telemetry,
};

#[derive(Default)]
pub struct InMemoryStore {
    devices: DashMap<DeviceId, Device>,
    rules: DashMap<String, MonitoringCheck>,
    telemetry: DashMap<DeviceId, Telemetry>,
    open_alerts: DashMap<ActiveKey, AlertTracking>,
    open_incidents: DashMap<(TargetType, String, String), Incident>,
    synthetic_checks: DashMap<String, SyntheticCheck>,
    licenses: DashMap<String, LicenseAsset>,
    channels: DashMap<String, NotificationChannel>,
    settings: RwLock<SystemSettings>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_channel(&self, channel: NotificationChannel) {
        self.channels.insert(channel.id.clone(), channel);
    }

    pub fn seed_rule(&self, rule: MonitoringCheck) {
        self.rules.insert(rule.id.clone(), rule);
    }
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn get(&self, device_id: &DeviceId) -> Result<Device, StoreError> {
        self.devices
            .get(device_id)
            .map(|d| d.clone())
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))
    }

    async fn upsert(&self, device: Device) -> Result<(), StoreError> {
        self.devices.insert(device.device_id.clone(), device);
        Ok(())
    }

    async fn list(&self) -> Vec<Device> {
        self.devices.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn list_for_device(&self, device_id: &DeviceId) -> Vec<MonitoringCheck> {
        self.rules
            .iter()
            .filter(|e| &e.value().device_id == device_id)
            .map(|e| e.value().clone())
            .collect()
    }

    async fn upsert(&self, check: MonitoringCheck) -> Result<(), StoreError> {
        self.rules.insert(check.id.clone(), check);
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for InMemoryStore {
    async fn latest(&self, device_id: &DeviceId) -> Option<Telemetry> {
        self.telemetry.get(device_id).map(|e| e.value().clone())
    }

    async fn upsert(&self, telemetry: Telemetry) -> Result<(), StoreError> {
        self.telemetry.insert(telemetry.device_id.clone(), telemetry);
        Ok(())
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn find_open(&self, key: &ActiveKey) -> Option<AlertTracking> {
        self.open_alerts.get(key).map(|e| e.value().clone())
    }

    async fn upsert(&self, alert: AlertTracking) -> Result<(), StoreError> {
        if alert.is_open() {
            self.open_alerts.insert(alert.active_key.clone(), alert);
        } else {
            self.open_alerts.remove(&alert.active_key);
        }
        Ok(())
    }

    async fn list_open(&self) -> Vec<AlertTracking> {
        self.open_alerts.iter().map(|e| e.value().clone()).collect()
    }

    async fn list_open_for_device(&self, device_id: &DeviceId) -> Vec<AlertTracking> {
        self.open_alerts
            .iter()
            .filter(|e| &e.key().device_id == device_id)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl IncidentStore for InMemoryStore {
    async fn find_open(&self, target_type: TargetType, target_id: &str, summary: &str) -> Option<Incident> {
        self.open_incidents
            .get(&(target_type, target_id.to_string(), summary.to_string()))
            .map(|e| e.value().clone())
    }

    async fn upsert(&self, incident: Incident) -> Result<(), StoreError> {
        let key = (incident.target_type, incident.target_id.clone(), incident.summary.clone());
        if incident.is_open() {
            self.open_incidents.insert(key, incident);
        } else {
            self.open_incidents.remove(&key);
        }
        Ok(())
    }

    async fn list_open(&self) -> Vec<Incident> {
        self.open_incidents.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl SyntheticCheckStore for InMemoryStore {
    async fn list_enabled(&self) -> Vec<SyntheticCheck> {
        self.synthetic_checks
            .iter()
            .filter(|e| e.value().enabled)
            .map(|e| e.value().clone())
            .collect()
    }

    async fn upsert(&self, check: SyntheticCheck) -> Result<(), StoreError> {
        self.synthetic_checks.insert(check.id.clone(), check);
        Ok(())
    }
}

#[async_trait]
impl LicenseStore for InMemoryStore {
    async fn list_enabled(&self) -> Vec<LicenseAsset> {
        self.licenses
            .iter()
            .filter(|e| e.value().enabled)
            .map(|e| e.value().clone())
            .collect()
    }

    async fn upsert(&self, license: LicenseAsset) -> Result<(), StoreError> {
        self.licenses.insert(license.id.clone(), license);
        Ok(())
    }
}

#[async_trait]
impl ChannelStore for InMemoryStore {
    async fn list_enabled(&self) -> Vec<NotificationChannel> {
        self.channels
            .iter()
            .filter(|e| e.value().enabled)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn get(&self) -> SystemSettings {
        self.settings.read().expect("settings lock poisoned").clone()
    }

    async fn upsert(&self, settings: SystemSettings) -> Result<(), StoreError> {
        *self.settings.write().expect("settings lock poisoned") = settings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_domain_models::{AlertState, AlertType, ThrottlePolicy};

    fn sample_alert(key: ActiveKey) -> AlertTracking {
        AlertTracking {
            id: "a1".into(),
            active_key: key,
            severity: fleetwatch_domain_models::Severity::Warning,
            state: AlertState::New,
            first_triggered: chrono::Utc::now(),
            last_notified: chrono::Utc::now(),
            notification_count: 1,
            throttling: ThrottlePolicy { repeat_minutes: 5, throttle_duration_minutes: 60 },
            resolved_at: None,
            resolution_reason: None,
            details: Default::default(),
        }
    }

    #[tokio::test]
    async fn resolved_alert_is_removed_from_open_index() {
        let store = InMemoryStore::new();
        let key = ActiveKey::new(DeviceId::new("d1"), AlertType::Offline);
        store.upsert(sample_alert(key.clone())).await.unwrap();
        assert!(store.find_open(&key).await.is_some());

        let mut resolved = sample_alert(key.clone());
        resolved.state = AlertState::Resolved;
        resolved.resolved_at = Some(chrono::Utc::now());
        store.upsert(resolved).await.unwrap();

        assert!(store.find_open(&key).await.is_none());
    }
}
