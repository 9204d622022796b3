//! Summary reporter.
//!
//! Stateless: every tick reads the current device/alert snapshot and
//! renders a fresh digest rather than tracking its own running totals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetwatch_core_clock::Clock;
use fleetwatch_domain_models::{
    store::{AlertStore, ChannelStore, DeviceStore},
    ChannelType, Device, DeviceStatus, Severity,
};
use fleetwatch_domain_notification::{NotificationEvent, NotificationKind, Notifier};

/// Floor enforced on `summary_interval_minutes` regardless of configured
/// value.
pub const SUMMARY_INTERVAL_FLOOR_MINUTES: u64 = 360;

/// Clamps a configured summary cadence to the enforced floor. The
/// control plane's ticker calls this when deriving its period.
pub fn effective_interval_minutes(configured: u64) -> u64 {
    configured.max(SUMMARY_INTERVAL_FLOOR_MINUTES)
}

pub struct SummaryReporter {
    device_store: Arc<dyn DeviceStore>,
    alert_store: Arc<dyn AlertStore>,
    channel_store: Arc<dyn ChannelStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SummaryReporter {
    pub fn new(
        device_store: Arc<dyn DeviceStore>,
        alert_store: Arc<dyn AlertStore>,
        channel_store: Arc<dyn ChannelStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device_store,
            alert_store,
            channel_store,
            notifier,
            clock,
        }
    }

    /// Renders and sends the digest unconditionally; callers gate cadence
    /// against `effective_interval_minutes`.
    pub async fn send_digest(&self) {
        let devices = self.device_store.list().await;
        let alerts = self.alert_store.list_open().await;
        let now = self.clock.now();

        let body = render_digest(&devices, &alerts, now);

        // Digests always go to Slack channels only;
        // routed directly here instead of through the dispatcher's
        // severity/alert-type filter, which doesn't apply to a fleet-wide
        // summary.
        let slack_channel_ids: Vec<String> = self
            .channel_store
            .list_enabled()
            .await
            .into_iter()
            .filter(|c| c.channel_type == ChannelType::Slack)
            .map(|c| c.id)
            .collect();

        if slack_channel_ids.is_empty() {
            return;
        }

        let mut event = NotificationEvent::new(NotificationKind::Digest, Severity::Info, "Fleet summary", body);
        event.channel_override = Some(slack_channel_ids);
        self.notifier.dispatch(event).await;
    }
}

fn render_digest(devices: &[Device], alerts: &[fleetwatch_domain_models::AlertTracking], now: DateTime<Utc>) -> String {
    let total = devices.len();
    let online = devices.iter().filter(|d| d.status == DeviceStatus::Online).count();
    let offline: Vec<&Device> = devices.iter().filter(|d| d.status == DeviceStatus::Offline).collect();
    let warning = devices.iter().filter(|d| d.status == DeviceStatus::Warning).count();
    let not_monitored = devices.iter().filter(|d| d.status == DeviceStatus::NotMonitored).count();

    let mut lines = vec![
        format!("Fleet summary — {total} devices"),
        format!("  online: {online}  warning: {warning}  offline: {} not_monitored: {not_monitored}", offline.len()),
        String::new(),
    ];

    if alerts.is_empty() {
        lines.push("No active alerts.".to_string());
    } else {
        lines.push(format!("Active alerts ({}):", alerts.len()));
        for alert in alerts {
            let age_minutes = (now - alert.first_triggered).num_minutes().max(0);
            let service = alert.active_key.specific_service.as_deref().unwrap_or("—");
            lines.push(format!(
                "  [{:?}] {} {:?}/{} ({age_minutes}m)",
                alert.severity, alert.active_key.device_id, alert.active_key.alert_type, service
            ));
        }
    }

    if !offline.is_empty() {
        lines.push(String::new());
        lines.push(format!("Offline devices ({}):", offline.len()));
        for device in &offline {
            let since = device
                .last_seen
                .map(|seen| format!("{}m ago", (now - seen).num_minutes().max(0)))
                .unwrap_or_else(|| "unknown".to_string());
            lines.push(format!("  {} — last seen {since}", device.name));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_domain_models::{ActiveKey, AlertState, AlertTracking, AlertType, DeviceId, DeviceType, ThrottlePolicy};

    fn device(id: &str, status: DeviceStatus) -> Device {
        let mut d = Device::new(DeviceId::new(id), id, DeviceType::Server);
        d.status = status;
        d
    }

    #[test]
    fn digest_lists_offline_devices_and_active_alerts() {
        let now = Utc::now();
        let devices = vec![device("d1", DeviceStatus::Online), device("d2", DeviceStatus::Offline)];
        let alert = AlertTracking {
            id: "a1".to_string(),
            active_key: ActiveKey::new(DeviceId::new("d2"), AlertType::Offline),
            severity: Severity::Critical,
            state: AlertState::Throttling,
            first_triggered: now,
            last_notified: now,
            notification_count: 1,
            throttling: ThrottlePolicy { repeat_minutes: 15, throttle_duration_minutes: 60 },
            resolved_at: None,
            resolution_reason: None,
            details: Default::default(),
        };
        let text = render_digest(&devices, &[alert], now);
        assert!(text.contains("2 devices"));
        assert!(text.contains("Offline devices (1)"));
        assert!(text.contains("Active alerts (1)"));
    }

    #[test]
    fn floor_is_enforced_even_for_small_configured_intervals() {
        assert_eq!(effective_interval_minutes(30), 360);
        assert_eq!(effective_interval_minutes(500), 500);
    }
}
