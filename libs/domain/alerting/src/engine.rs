use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fleetwatch_core_clock::Clock;
use fleetwatch_domain_incidents::IncidentAggregator;
use fleetwatch_domain_models::{
    store::{AlertStore, DeviceStore, RuleStore, SettingsStore},
    ActiveKey, AlertDetails, AlertState, AlertTracking, AlertType, DeviceId, DeviceStatus, Severity,
    TargetType, ThrottlePolicy,
};
use fleetwatch_domain_notification::{NotificationEvent, NotificationKind, Notifier};

use crate::policy::{default_policy, incident_summary};

/// Mirrors the heartbeat monitor's detection-time-gap key; kept as a
/// plain string constant rather than a shared crate to avoid a dependency
/// cycle (heartbeat already depends on this crate for `AlertEngine`).
const OFFLINE_DELTA_SECONDS_KEY: &str = "offline_delta_seconds";

pub struct TriggerParams {
    pub active_key: ActiveKey,
    pub severity: Severity,
    pub details: AlertDetails,
    pub throttling_override: Option<ThrottlePolicy>,
    pub title: String,
    pub body: String,
}

impl TriggerParams {
    pub fn new(active_key: ActiveKey, severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            active_key,
            severity,
            details: AlertDetails::default(),
            throttling_override: None,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn with_details(mut self, details: AlertDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_throttling(mut self, throttling: ThrottlePolicy) -> Self {
        self.throttling_override = Some(throttling);
        self
    }
}

/// Result of `resolve_offline_recovery_bundle`.
#[derive(Debug, Clone)]
pub struct RecoveryBundle {
    pub device_id: DeviceId,
    pub offline_duration: Option<Duration>,
    pub restored_services: Vec<String>,
}

/// Three public operations only:
/// `trigger_alert`, `resolve_alert` (plus its silent variant), and
/// `process_throttled_alerts`. Everything else is a named variant of one
/// of those three to keep the recovery-bundle and startup-reconciliation
/// paths from needing a fourth public verb.
pub struct AlertEngine {
    alert_store: Arc<dyn AlertStore>,
    device_store: Arc<dyn DeviceStore>,
    rule_store: Arc<dyn RuleStore>,
    notifier: Arc<dyn Notifier>,
    incidents: Arc<IncidentAggregator>,
    clock: Arc<dyn Clock>,
    settings_store: Arc<dyn SettingsStore>,
}

impl AlertEngine {
    pub fn new(
        alert_store: Arc<dyn AlertStore>,
        device_store: Arc<dyn DeviceStore>,
        rule_store: Arc<dyn RuleStore>,
        notifier: Arc<dyn Notifier>,
        incidents: Arc<IncidentAggregator>,
        clock: Arc<dyn Clock>,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            alert_store,
            device_store,
            rule_store,
            notifier,
            incidents,
            clock,
            settings_store,
        }
    }

    /// Idempotent in active-key; escalates on higher severity.
    pub async fn trigger_alert(&self, params: TriggerParams) -> AlertTracking {
        let now = self.clock.now();

        if let Some(mut existing) = self.alert_store.find_open(&params.active_key).await {
            existing.details.merge_from(&params.details);
            let escalated = params.severity.rank() > existing.severity.rank();
            if escalated {
                existing.severity = params.severity;
                existing.last_notified = now;
                existing.notification_count += 1;
            }
            if let Err(e) = self.alert_store.upsert(existing.clone()).await {
                tracing::error!(error = %e, "failed to persist escalated alert");
            }
            if escalated {
                let event = NotificationEvent::new(NotificationKind::Alert, existing.severity, params.title.clone(), params.body.clone())
                    .with_alert_type(params.active_key.alert_type);
                self.notifier.dispatch(event).await;
            }
            self.incidents
                .ensure_open(
                    TargetType::Device,
                    params.active_key.device_id.as_str(),
                    &incident_summary(&params.active_key),
                    existing.severity,
                    params.title,
                )
                .await;
            return existing;
        }

        let settings = self.settings_store.get().await;
        let policy = params
            .throttling_override
            .unwrap_or_else(|| default_policy(params.active_key.alert_type, params.severity, &settings));

        let record = AlertTracking {
            id: uuid::Uuid::new_v4().to_string(),
            active_key: params.active_key.clone(),
            severity: params.severity,
            // Trigger sends immediately and transitions straight into
            // `throttling`; `new` exists as a transient logical state,
            // not a persisted resting state.
            state: AlertState::Throttling,
            first_triggered: now,
            last_notified: now,
            notification_count: 1,
            throttling: policy,
            resolved_at: None,
            resolution_reason: None,
            details: params.details,
        };

        if let Err(e) = self.alert_store.upsert(record.clone()).await {
            tracing::error!(error = %e, "failed to persist new alert");
        }

        let event = NotificationEvent::new(NotificationKind::Alert, record.severity, params.title.clone(), params.body)
            .with_alert_type(params.active_key.alert_type);
        self.notifier.dispatch(event).await;

        self.incidents
            .ensure_open(
                TargetType::Device,
                params.active_key.device_id.as_str(),
                &incident_summary(&params.active_key),
                record.severity,
                params.title,
            )
            .await;

        record
    }

    /// Resolves and sends a recovery notification.
    pub async fn resolve_alert(
        &self,
        key: &ActiveKey,
        reason: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Option<AlertTracking> {
        self.resolve_inner(key, reason, Some((title.into(), body.into()))).await
    }

    /// Resolves without sending any notification (pause/disable/unmonitor
    /// path, and the internal leg of the recovery bundle).
    pub async fn resolve_alert_silently(&self, key: &ActiveKey, reason: impl Into<String>) -> Option<AlertTracking> {
        self.resolve_inner(key, reason, None).await
    }

    async fn resolve_inner(
        &self,
        key: &ActiveKey,
        reason: impl Into<String>,
        notify: Option<(String, String)>,
    ) -> Option<AlertTracking> {
        let mut record = self.alert_store.find_open(key).await?;
        let now = self.clock.now();
        record.state = AlertState::Resolved;
        record.resolved_at = Some(now);
        let reason = reason.into();
        record.resolution_reason = Some(reason.clone());

        if let Err(e) = self.alert_store.upsert(record.clone()).await {
            tracing::error!(error = %e, "failed to persist alert resolution");
        }

        self.incidents
            .resolve(TargetType::Device, key.device_id.as_str(), &incident_summary(key), reason)
            .await;

        if let Some((title, body)) = notify {
            let event = NotificationEvent::new(NotificationKind::Recovery, Severity::Info, title, body)
                .with_alert_type(key.alert_type);
            self.notifier.dispatch(event).await;
        }

        Some(record)
    }

    /// 60s ticker body.
    pub async fn process_throttled_alerts(&self) {
        let now = self.clock.now();
        for alert in self.alert_store.list_open().await {
            if !self.still_monitored(&alert.active_key).await {
                let reason = self.silence_reason(&alert.active_key).await;
                self.resolve_alert_silently(&alert.active_key, reason).await;
                continue;
            }

            match alert.state {
                AlertState::HourlyOnly => {
                    if now - alert.last_notified >= Duration::minutes(60) {
                        self.send_reminder(alert, now).await;
                    }
                }
                AlertState::New | AlertState::Throttling => {
                    if now - alert.last_notified >= alert.throttling.repeat() {
                        match alert.throttling.duration() {
                            Some(duration) if now - alert.first_triggered >= duration => {
                                let mut transitioned = alert;
                                transitioned.state = AlertState::HourlyOnly;
                                if let Err(e) = self.alert_store.upsert(transitioned).await {
                                    tracing::error!(error = %e, "failed to persist hourly_only transition");
                                }
                            }
                            _ => self.send_reminder(alert, now).await,
                        }
                    }
                }
                AlertState::Resolved => {}
            }
        }
    }

    async fn send_reminder(&self, mut alert: AlertTracking, now: DateTime<Utc>) {
        alert.last_notified = now;
        alert.notification_count += 1;
        let event = NotificationEvent::new(
            NotificationKind::Reminder,
            alert.severity,
            format!("{:?} still active", alert.active_key.alert_type),
            incident_summary(&alert.active_key),
        )
        .with_alert_type(alert.active_key.alert_type);
        self.notifier.dispatch(event).await;
        if let Err(e) = self.alert_store.upsert(alert).await {
            tracing::error!(error = %e, "failed to persist reminder");
        }
    }

    /// Whether `key`'s owning alert condition still exists and is still
    /// supposed to notify. Synthetic checks (and any future non-device
    /// target) key their alerts on a pseudo device-id that never appears in
    /// `device_store` — re-validating those against the device store would
    /// always read as "no longer monitored" and silently resolve them on
    /// every throttle tick, so only alert types that actually own a device
    /// row go through the device/rule lookup at all.
    async fn still_monitored(&self, key: &ActiveKey) -> bool {
        if !key_owns_device(key) {
            return true;
        }

        let Ok(device) = self.device_store.get(&key.device_id).await else {
            return false;
        };
        if !device.is_monitorable() {
            return false;
        }
        if key.alert_type == AlertType::RuleViolation {
            if let Some(service) = &key.specific_service {
                let checks = self.rule_store.list_for_device(&key.device_id).await;
                // An empty list means rules aren't tracked for this device
                // at all (nothing to contradict the alert); only an actual
                // non-matching set of checks means the specific rule was
                // deleted, disabled, or retargeted.
                let still_exists = checks.is_empty()
                    || checks.iter().any(|c| {
                        c.check_type.label() == service
                            && c.enabled
                            && normalize_endpoint(c.target.as_deref()) == normalize_endpoint(key.specific_endpoint.as_deref())
                    });
                if !still_exists {
                    return false;
                }
            }
        }
        true
    }

    async fn silence_reason(&self, key: &ActiveKey) -> String {
        if !key_owns_device(key) {
            return "Service/endpoint no longer monitored".to_string();
        }
        match self.device_store.get(&key.device_id).await {
            Ok(device) if !device.is_monitorable() => "Monitoring paused/disabled".to_string(),
            _ => "Service/endpoint no longer monitored".to_string(),
        }
    }

    /// Resolves all open `{offline, service_down}` records for a device in
    /// one pass and emits exactly one bundled recovery notification.
    pub async fn resolve_offline_recovery_bundle(&self, device_id: &DeviceId) -> Option<RecoveryBundle> {
        let open = self.alert_store.list_open_for_device(device_id).await;
        let relevant: Vec<AlertTracking> = open
            .into_iter()
            .filter(|a| matches!(a.active_key.alert_type, AlertType::Offline | AlertType::ServiceDown))
            .collect();
        if relevant.is_empty() {
            return None;
        }

        // The detection-time gap is captured once, in `details.extra`, by
        // whichever path opened the offline alert (scanner threshold or a
        // forced offline status message) — recomputing it here against
        // `first_triggered` would measure time-since-alert-opened instead
        // of the actual outage.
        let offline_duration = relevant
            .iter()
            .find(|a| a.active_key.alert_type == AlertType::Offline)
            .and_then(|a| a.details.extra.get(OFFLINE_DELTA_SECONDS_KEY))
            .and_then(|s| s.parse::<i64>().ok())
            .map(Duration::seconds);
        let restored_services: Vec<String> = relevant
            .iter()
            .filter(|a| a.active_key.alert_type == AlertType::ServiceDown)
            .filter_map(|a| a.active_key.specific_service.clone())
            .collect();

        for alert in &relevant {
            self.resolve_alert_silently(&alert.active_key, "Resolved via device recovery bundle").await;
        }

        let duration_text = offline_duration.map(format_duration).unwrap_or_else(|| "unknown".to_string());
        let mut body = format!("Offline Duration: {duration_text}");
        if !restored_services.is_empty() {
            body.push_str(&format!("\nRestored services: {}", restored_services.join(", ")));
        }

        let event = NotificationEvent::new(
            NotificationKind::Recovery,
            Severity::Info,
            format!("Device Recovery: {device_id}"),
            body,
        )
        .with_alert_type(AlertType::Offline);
        self.notifier.dispatch(event).await;

        Some(RecoveryBundle {
            device_id: device_id.clone(),
            offline_duration,
            restored_services,
        })
    }

    /// Walks all non-resolved records on boot; any `offline` alert whose
    /// device is currently online is auto-resolved.
    pub async fn reconcile_on_startup(&self) {
        for alert in self.alert_store.list_open().await {
            if alert.active_key.alert_type != AlertType::Offline {
                continue;
            }
            if let Ok(device) = self.device_store.get(&alert.active_key.device_id).await {
                if device.status == DeviceStatus::Online {
                    self.resolve_alert_silently(&alert.active_key, "Auto-resolved during startup normalization")
                        .await;
                }
            }
        }
    }
}

/// Whether `key.device_id` names a real device row, as opposed to a
/// pseudo-id minted for a check that has no device of its own (synthetics
/// key on `synthetic:{check_id}`; license checks, if ever routed through
/// this engine, would key on a similar `license:` prefix).
fn key_owns_device(key: &ActiveKey) -> bool {
    let id = key.device_id.as_str();
    !(id.starts_with("synthetic:") || id.starts_with("license:"))
}

/// `""` and `None` both mean "no specific target"; treat them as equal so a
/// rule stored with `target: None` still matches a key built before that
/// distinction was normalized at the call site.
fn normalize_endpoint(endpoint: Option<&str>) -> Option<&str> {
    endpoint.filter(|e| !e.is_empty())
}

fn format_duration(d: Duration) -> String {
    let total_seconds = d.num_seconds().max(0);
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
