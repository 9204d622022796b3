//! Heartbeat / offline detector.
//!
//! Tracks per-device liveness from two angles: `record_heartbeat` reacts
//! immediately to an inbound telemetry payload, while `scan` is the body
//! of the 30s offline-scanner ticker that catches devices nobody has
//! heard from.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fleetwatch_core_clock::Clock;
use fleetwatch_domain_alerting::{AlertEngine, TriggerParams};
use fleetwatch_domain_models::{
    store::DeviceStore, ActiveKey, AlertDetails, AlertType, Device, DeviceId, DeviceStatus, Module,
    Severity, ThrottlePolicy,
};

/// Key under which the offline alert's `details.extra` carries the
/// detection-time gap (`now - last_seen` when the scanner/forced-offline
/// path first opened the alert), so the recovery bundle can report actual
/// downtime instead of time-since-alert-opened.
const OFFLINE_DELTA_SECONDS_KEY: &str = "offline_delta_seconds";

/// A module's `last_successful_metrics` entry older than this is
/// considered stale enough to open a `service_down` alert for that
/// module alone.
pub const SERVICE_STALENESS: Duration = Duration::seconds(120);

pub struct HeartbeatMonitor {
    device_store: Arc<dyn DeviceStore>,
    alert_engine: Arc<AlertEngine>,
    clock: Arc<dyn Clock>,
    default_offline_multiplier: f64,
}

impl HeartbeatMonitor {
    pub fn new(device_store: Arc<dyn DeviceStore>, alert_engine: Arc<AlertEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            device_store,
            alert_engine,
            clock,
            default_offline_multiplier: 4.0,
        }
    }

    pub fn with_default_offline_multiplier(mut self, multiplier: f64) -> Self {
        self.default_offline_multiplier = multiplier;
        self
    }

    /// Reacts to an inbound module payload reaching the device: updates
    /// `last_seen`, the rolling heartbeat window, and — if the device was
    /// `offline` or `not_monitored` — brings it back online and resolves
    /// the recovery bundle.
    pub async fn record_heartbeat(&self, device_id: &DeviceId, now: DateTime<Utc>) {
        let Ok(mut device) = self.device_store.get(device_id).await else {
            return;
        };

        let was_down = matches!(device.status, DeviceStatus::Offline | DeviceStatus::NotMonitored);
        device.push_heartbeat(now);
        if was_down {
            device.status = DeviceStatus::Online;
        }
        if let Err(e) = self.device_store.upsert(device).await {
            tracing::error!(error = %e, device_id = %device_id, "failed to persist heartbeat");
        }

        if was_down {
            self.alert_engine.resolve_offline_recovery_bundle(device_id).await;
        }
    }

    /// Handles an explicit status message from `iotmonitor/device/{id}/status`.
    /// Retained payloads never emit notifications; a non-retained `offline`
    /// opens an offline alert immediately instead of waiting for the next
    /// scanner tick.
    pub async fn handle_explicit_status(&self, device_id: &DeviceId, status: &str, retained: bool) {
        let lowered = status.trim().to_lowercase();

        if retained {
            if lowered == "online" {
                if let Ok(mut device) = self.device_store.get(device_id).await {
                    device.last_seen = Some(self.clock.now());
                    let _ = self.device_store.upsert(device).await;
                }
            }
            return;
        }

        match lowered.as_str() {
            "online" => self.record_heartbeat(device_id, self.clock.now()).await,
            "offline" => self.force_offline(device_id).await,
            "warning" => self.set_status(device_id, DeviceStatus::Warning).await,
            "not_monitored" => self.set_status(device_id, DeviceStatus::NotMonitored).await,
            other => tracing::warn!(device_id = %device_id, status = %other, "unrecognized device status payload"),
        }
    }

    async fn set_status(&self, device_id: &DeviceId, status: DeviceStatus) {
        if let Ok(mut device) = self.device_store.get(device_id).await {
            device.status = status;
            let _ = self.device_store.upsert(device).await;
        }
    }

    async fn force_offline(&self, device_id: &DeviceId) {
        let Ok(mut device) = self.device_store.get(device_id).await else {
            return;
        };
        if device.status == DeviceStatus::Offline {
            return;
        }
        let now = self.clock.now();
        let delta = device.last_seen.map(|last_seen| now - last_seen);
        device.status = DeviceStatus::Offline;
        let overrides = device.overrides.clone();
        if let Err(e) = self.device_store.upsert(device).await {
            tracing::error!(error = %e, device_id = %device_id, "failed to persist forced-offline status");
        }

        let key = ActiveKey::new(device_id.clone(), AlertType::Offline);
        let mut params = TriggerParams::new(
            key,
            Severity::Critical,
            format!("Device offline: {device_id}"),
            "Device reported offline via explicit status message.",
        )
        .with_details(offline_delta_details(delta));
        if let (Some(repeat), Some(duration)) =
            (overrides.repeat_interval_minutes, overrides.throttling_duration_minutes)
        {
            params = params.with_throttling(ThrottlePolicy {
                repeat_minutes: repeat,
                throttle_duration_minutes: duration,
            });
        }
        self.alert_engine.trigger_alert(params).await;
    }

    /// Body of the 30s offline-scanner ticker. Iterates every monitorable
    /// device, evaluates the offline threshold, and checks per-module
    /// staleness for `service_down`.
    pub async fn scan(&self) {
        let now = self.clock.now();
        for device in self.device_store.list().await {
            if !device.is_monitorable() {
                continue;
            }
            self.scan_offline(&device, now).await;
            self.scan_service_staleness(&device, now).await;
        }
    }

    async fn scan_offline(&self, device: &Device, now: DateTime<Utc>) {
        let expected_seconds = device.expected_message_interval_seconds.max(1) as f64;
        let multiplier = device
            .overrides
            .offline_critical_threshold_multiplier
            .unwrap_or(self.default_offline_multiplier);
        let threshold_seconds = expected_seconds * multiplier;

        let (delta, delta_seconds) = match device.last_seen {
            Some(last_seen) => {
                let delta = now - last_seen;
                (delta, delta.num_seconds() as f64)
            }
            None => (Duration::seconds(i64::MAX / 2), f64::INFINITY),
        };

        if delta_seconds > threshold_seconds && device.status != DeviceStatus::Offline {
            let mut updated = device.clone();
            updated.status = DeviceStatus::Offline;
            updated.consecutive_missed_messages = (delta_seconds / expected_seconds).floor() as u64;
            if let Err(e) = self.device_store.upsert(updated).await {
                tracing::error!(error = %e, device_id = %device.device_id, "failed to persist offline transition");
            }

            let key = ActiveKey::new(device.device_id.clone(), AlertType::Offline);
            let mut params = TriggerParams::new(
                key,
                Severity::Critical,
                format!("Device offline: {}", device.device_id),
                format!(
                    "No heartbeat for {}s (expected every {}s).",
                    delta.num_seconds(),
                    device.expected_message_interval_seconds
                ),
            )
            .with_details(offline_delta_details(Some(delta)));
            if let (Some(repeat), Some(duration)) = (
                device.overrides.repeat_interval_minutes,
                device.overrides.throttling_duration_minutes,
            ) {
                params = params.with_throttling(ThrottlePolicy {
                    repeat_minutes: repeat,
                    throttle_duration_minutes: duration,
                });
            }
            self.alert_engine.trigger_alert(params).await;
        } else if delta_seconds <= threshold_seconds && device.status == DeviceStatus::Offline {
            let mut updated = device.clone();
            updated.status = DeviceStatus::Online;
            if let Err(e) = self.device_store.upsert(updated).await {
                tracing::error!(error = %e, device_id = %device.device_id, "failed to persist recovery transition");
            }
            self.alert_engine.resolve_offline_recovery_bundle(&device.device_id).await;
        }
    }

    async fn scan_service_staleness(&self, device: &Device, now: DateTime<Utc>) {
        if device.status != DeviceStatus::Online {
            return;
        }
        for module in &device.enabled_modules {
            let key = ActiveKey::new(device.device_id.clone(), AlertType::ServiceDown).with_service(module_label(*module));
            let stale = match device.last_successful_metrics.get(module) {
                Some(last) => now - *last > SERVICE_STALENESS,
                None => false,
            };

            if stale {
                let params = TriggerParams::new(
                    key,
                    Severity::Warning,
                    format!("Module {module:?} unresponsive on {}", device.device_id),
                    format!("No successful {module:?} payload for over {}s.", SERVICE_STALENESS.num_seconds()),
                );
                self.alert_engine.trigger_alert(params).await;
            } else {
                self.alert_engine
                    .resolve_alert(&key, "Service recovered", format!("Module {module:?} recovered"), format!("{} is reporting again", device.device_id))
                    .await;
            }
        }
    }
}

fn offline_delta_details(delta: Option<Duration>) -> AlertDetails {
    let mut details = AlertDetails::default();
    if let Some(delta) = delta {
        details
            .extra
            .insert(OFFLINE_DELTA_SECONDS_KEY.to_string(), delta.num_seconds().to_string());
    }
    details
}

fn module_label(module: Module) -> &'static str {
    match module {
        Module::System => "system",
        Module::Docker => "docker",
        Module::Asterisk => "asterisk",
        Module::Network => "network",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core_clock::FrozenClock;
    use fleetwatch_domain_alerting::AlertEngine;
    use fleetwatch_domain_incidents::IncidentAggregator;
    use fleetwatch_domain_models::{
        store::{AlertStore, SettingsStore},
        Device, DeviceType,
    };
    use fleetwatch_domain_notification::{DispatchReport, NotificationEvent, Notifier};
    use fleetwatch_infra_store::InMemoryStore;

    struct NullNotifier;
    #[async_trait::async_trait]
    impl Notifier for NullNotifier {
        async fn dispatch(&self, _event: NotificationEvent) -> DispatchReport {
            DispatchReport::default()
        }
    }

    fn harness(now: DateTime<Utc>) -> (Arc<InMemoryStore>, Arc<FrozenClock>, HeartbeatMonitor) {
        let store = Arc::new(InMemoryStore::new());
        let clock = FrozenClock::new(now);
        let incidents = Arc::new(IncidentAggregator::new(store.clone(), clock.clone() as Arc<dyn Clock>));
        let engine = Arc::new(AlertEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(NullNotifier),
            incidents,
            clock.clone() as Arc<dyn Clock>,
            store.clone() as Arc<dyn SettingsStore>,
        ));
        let monitor = HeartbeatMonitor::new(store.clone(), engine, clock.clone() as Arc<dyn Clock>);
        (store, clock, monitor)
    }

    #[tokio::test]
    async fn offline_scan_then_recovery_bundle() {
        let start = Utc::now();
        let (store, clock, monitor) = harness(start);
        let mut device = Device::new("d1", "d1", DeviceType::Server);
        device.status = DeviceStatus::Online;
        device.expected_message_interval_seconds = 15;
        device.last_seen = Some(start);
        DeviceStore::upsert(&*store, device).await.unwrap();

        clock.advance(Duration::seconds(120));
        monitor.scan().await;
        let device = DeviceStore::get(&*store, &DeviceId::new("d1")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        let open = store.list_open().await;
        let offline_alert = open.iter().find(|a| a.active_key.alert_type == AlertType::Offline).expect("offline alert opened");
        assert_eq!(
            offline_alert.details.extra.get(OFFLINE_DELTA_SECONDS_KEY),
            Some(&"120".to_string()),
            "detection-time gap captured for the recovery bundle"
        );

        clock.advance(Duration::seconds(5));
        monitor.record_heartbeat(&DeviceId::new("d1"), clock.now()).await;
        let device = DeviceStore::get(&*store, &DeviceId::new("d1")).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert!(store.list_open().await.is_empty());
    }

    #[tokio::test]
    async fn stale_module_opens_and_clears_service_down() {
        let start = Utc::now();
        let (store, clock, monitor) = harness(start);
        let mut device = Device::new("d1", "d1", DeviceType::Server);
        device.status = DeviceStatus::Online;
        device.enabled_modules = vec![Module::Docker];
        device.last_seen = Some(start);
        device.last_successful_metrics.insert(Module::Docker, start);
        DeviceStore::upsert(&*store, device).await.unwrap();

        clock.advance(Duration::seconds(130));
        monitor.scan().await;
        assert!(store.list_open().await.iter().any(|a| a.active_key.alert_type == AlertType::ServiceDown));

        let mut device = DeviceStore::get(&*store, &DeviceId::new("d1")).await.unwrap();
        device.last_successful_metrics.insert(Module::Docker, clock.now());
        device.last_seen = Some(clock.now());
        DeviceStore::upsert(&*store, device).await.unwrap();

        monitor.scan().await;
        assert!(store.list_open().await.is_empty());
    }
}
