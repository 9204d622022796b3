//! Rule evaluator.
//!
//! Evaluates each device's enabled `MonitoringCheck`s against its latest
//! `Telemetry` record, plus the SIP-peer checks that ride independently
//! of any configured check.

use std::sync::Arc;

use chrono::Duration;
use fleetwatch_core_clock::Clock;
use fleetwatch_domain_alerting::{AlertEngine, TriggerParams};
use fleetwatch_domain_models::{
    store::{DeviceStore, RuleStore, TelemetryStore},
    ActiveKey, AlertDetails, AlertType, CheckState, CheckType, Device, MonitoringCheck, Module, Severity, Telemetry,
};

/// Fallback SIP round-trip-time threshold when a device has no override
/// and no explicit `sip_rtt` check covers the endpoint.
pub const DEFAULT_SIP_RTT_THRESHOLD_MS: f64 = 150.0;

pub struct RuleEvaluator {
    device_store: Arc<dyn DeviceStore>,
    telemetry_store: Arc<dyn TelemetryStore>,
    rule_store: Arc<dyn RuleStore>,
    alert_engine: Arc<AlertEngine>,
    clock: Arc<dyn Clock>,
}

impl RuleEvaluator {
    pub fn new(
        device_store: Arc<dyn DeviceStore>,
        telemetry_store: Arc<dyn TelemetryStore>,
        rule_store: Arc<dyn RuleStore>,
        alert_engine: Arc<AlertEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device_store,
            telemetry_store,
            rule_store,
            alert_engine,
            clock,
        }
    }

    /// Body of the rule-evaluator ticker: every monitorable device with
    /// an Asterisk module enabled also gets its SIP peers swept.
    pub async fn tick(&self) {
        for device in self.device_store.list().await {
            if !device.is_monitorable() {
                continue;
            }
            let Some(telemetry) = self.telemetry_store.latest(&device.device_id).await else {
                continue;
            };
            self.evaluate_checks(&device, &telemetry).await;
            if device.has_module(Module::Asterisk) {
                self.evaluate_sip_peers(&device, &telemetry).await;
            }
        }
    }

    async fn evaluate_checks(&self, device: &Device, telemetry: &Telemetry) {
        let now = self.clock.now();
        for mut check in self.rule_store.list_for_device(&device.device_id).await {
            if !check.enabled {
                continue;
            }
            let Some(module) = check.check_type.required_module() else {
                continue;
            };
            if !device.has_module(module) {
                continue;
            }
            if let Some(last) = check.last_evaluated_at {
                if now - last < Duration::seconds(check.interval_seconds as i64) {
                    continue;
                }
            }

            let previous_state = check.last_state;
            let (new_state, value, unit, message) = evaluate_one(&check, telemetry);

            check.last_value = value;
            check.last_state = new_state;
            check.last_evaluated_at = Some(now);
            check.last_message = message.clone();
            if let Err(e) = self.rule_store.upsert(check.clone()).await {
                tracing::error!(error = %e, check_id = %check.id, "failed to persist check evaluation");
            }

            let mut key = ActiveKey::new(device.device_id.clone(), AlertType::RuleViolation)
                .with_service(check.check_type.label());
            if let Some(target) = check.target.clone() {
                key = key.with_endpoint(target);
            }

            match new_state {
                CheckState::Critical | CheckState::Warning => {
                    let severity = if new_state == CheckState::Critical { Severity::Critical } else { Severity::Warning };
                    let threshold = if new_state == CheckState::Critical { check.thresholds.critical } else { check.thresholds.warning };
                    let details = AlertDetails { value, threshold: Some(threshold), unit: unit.map(str::to_string), message: message.clone(), ..Default::default() };
                    let title = format!("{} {:?} on {}", check.check_type.label(), new_state, device.name);
                    let body = message.unwrap_or_else(|| format!("{} is {:?}", check.check_type.label(), new_state));
                    let params = TriggerParams::new(key, severity, title, body).with_details(details);
                    self.alert_engine.trigger_alert(params).await;
                }
                CheckState::Ok if previous_state != CheckState::Ok => {
                    self.alert_engine
                        .resolve_alert(
                            &key,
                            "back within threshold",
                            format!("{} recovered on {}", check.check_type.label(), device.name),
                            format!("{} is back within threshold", check.check_type.label()),
                        )
                        .await;
                }
                CheckState::Ok | CheckState::Unknown => {}
            }
        }
    }

    async fn evaluate_sip_peers(&self, device: &Device, telemetry: &Telemetry) {
        let checks = self.rule_store.list_for_device(&device.device_id).await;

        for contact in &telemetry.extra.contacts {
            let issue_key = ActiveKey::new(device.device_id.clone(), AlertType::SipIssue).with_endpoint(contact.aor.clone());
            let unreachable = contact.status.to_lowercase().contains("unavail");
            if unreachable {
                let params = TriggerParams::new(
                    issue_key,
                    Severity::Critical,
                    format!("SIP peer unreachable: {}", contact.aor),
                    format!("{} reports status {}", contact.aor, contact.status),
                );
                self.alert_engine.trigger_alert(params).await;
            } else {
                self.alert_engine
                    .resolve_alert(
                        &issue_key,
                        "peer reachable again",
                        format!("SIP peer recovered: {}", contact.aor),
                        format!("{} is reachable again", contact.aor),
                    )
                    .await;
            }

            let latency_key = ActiveKey::new(device.device_id.clone(), AlertType::HighLatency).with_endpoint(contact.aor.clone());
            let covered_by_rule = checks
                .iter()
                .any(|c| c.enabled && c.check_type == CheckType::SipRtt && c.target.as_deref() == Some(contact.aor.as_str()));

            if covered_by_rule {
                self.alert_engine
                    .resolve_alert_silently(&latency_key, "covered by sip_rtt rule_violation pipeline")
                    .await;
                continue;
            }

            let Some(rtt) = contact.rtt_ms else { continue };
            let threshold = device.overrides.sip_rtt_threshold_ms.unwrap_or(DEFAULT_SIP_RTT_THRESHOLD_MS);
            if rtt > threshold {
                let params = TriggerParams::new(
                    latency_key,
                    Severity::Critical,
                    format!("High SIP latency: {}", contact.aor),
                    format!("{} round-trip time {rtt:.1}ms exceeds {threshold:.1}ms", contact.aor),
                );
                self.alert_engine.trigger_alert(params).await;
            } else {
                self.alert_engine
                    .resolve_alert(
                        &latency_key,
                        "rtt back under threshold",
                        format!("SIP latency recovered: {}", contact.aor),
                        format!("{} round-trip time is back under {threshold:.1}ms", contact.aor),
                    )
                    .await;
            }
        }
    }
}

/// Evaluates one check against the telemetry record, returning
/// `(new_state, value, unit, message)`.
fn evaluate_one(check: &MonitoringCheck, telemetry: &Telemetry) -> (CheckState, Option<f64>, Option<&'static str>, Option<String>) {
    if check.check_type == CheckType::ContainerStatus {
        let (state, message) = classify_container(check, telemetry);
        return (state, None, None, message);
    }

    match extract_scalar(check, telemetry) {
        Some((value, unit)) => {
            let state = classify_scalar(check, value);
            let message = Some(format!("{} = {value:.2}{unit}", check.check_type.label()));
            (state, Some(value), Some(unit), message)
        }
        None => (CheckState::Unknown, None, None, None),
    }
}

fn extract_scalar(check: &MonitoringCheck, telemetry: &Telemetry) -> Option<(f64, &'static str)> {
    match check.check_type {
        CheckType::Cpu => telemetry.cpu_usage.map(|v| (v, "%")),
        CheckType::Memory => telemetry.memory_usage.map(|v| (v, "%")),
        CheckType::Disk => check
            .target
            .as_ref()
            .and_then(|t| telemetry.extra.disks.iter().find(|d| d.matches_target(t)))
            .map(|d| d.usage_percent)
            .or(telemetry.disk_usage)
            .map(|v| (v, "%")),
        CheckType::Bandwidth => check
            .target
            .as_ref()
            .and_then(|t| telemetry.extra.interfaces.iter().find(|i| &i.name == t))
            .map(|i| ((i.rx_bps + i.tx_bps) / 1_000_000.0, "Mbps")),
        CheckType::Utilization => check
            .target
            .as_ref()
            .and_then(|t| telemetry.extra.interfaces.iter().find(|i| &i.name == t))
            .and_then(|i| i.utilization_percent)
            .map(|v| (v, "%")),
        CheckType::SipRtt => check
            .target
            .as_ref()
            .and_then(|t| telemetry.extra.contacts.iter().find(|c| &c.aor == t))
            .and_then(|c| c.rtt_ms)
            .map(|v| (v, "ms")),
        CheckType::SipRegistration => check
            .target
            .as_ref()
            .and_then(|t| telemetry.extra.registrations.iter().find(|r| &r.name == t))
            .map(|r| (if r.status.eq_ignore_ascii_case("registered") { 100.0 } else { 0.0 }, "%")),
        CheckType::ContainerStatus | CheckType::Custom => None,
    }
}

fn classify_scalar(check: &MonitoringCheck, value: f64) -> CheckState {
    if check.check_type.higher_is_worse() {
        if value >= check.thresholds.critical {
            CheckState::Critical
        } else if value >= check.thresholds.warning {
            CheckState::Warning
        } else {
            CheckState::Ok
        }
    } else if value <= check.thresholds.critical {
        CheckState::Critical
    } else if value <= check.thresholds.warning {
        CheckState::Warning
    } else {
        CheckState::Ok
    }
}

fn classify_container(check: &MonitoringCheck, telemetry: &Telemetry) -> (CheckState, Option<String>) {
    let Some(docker) = &telemetry.extra.docker else {
        return (CheckState::Unknown, None);
    };
    if docker.containers.is_empty() {
        return (CheckState::Unknown, None);
    }

    let found = check.target.as_ref().and_then(|target| docker.containers.iter().find(|c| &c.name == target));
    match found {
        None => (CheckState::Critical, Some(format!("container {:?} not found", check.target))),
        Some(container) => {
            let state = container.state.as_deref().unwrap_or("").to_lowercase();
            let status = container.status.as_deref().unwrap_or("").to_lowercase();
            let health = container.health.as_deref().unwrap_or("").to_lowercase();

            if matches!(state.as_str(), "stopped" | "dead" | "exited" | "unhealthy") || health == "unhealthy" || status.contains("unhealthy") {
                (CheckState::Critical, Some(format!("container {} is {state}", container.name)))
            } else if matches!(state.as_str(), "restarting" | "paused" | "created") {
                (CheckState::Warning, Some(format!("container {} is {state}", container.name)))
            } else {
                (CheckState::Ok, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core_clock::FrozenClock;
    use fleetwatch_domain_incidents::IncidentAggregator;
    use fleetwatch_domain_models::{
        store::{AlertStore, DeviceStore, RuleStore, SettingsStore},
        CheckThresholds, Device, DeviceType, ModulePayload, SystemMetricsPayload,
    };
    use fleetwatch_domain_notification::{DispatchReport, NotificationEvent, Notifier};
    use fleetwatch_domain_telemetry::TelemetryConsolidator;
    use fleetwatch_infra_store::InMemoryStore;

    struct NullNotifier;
    #[async_trait::async_trait]
    impl Notifier for NullNotifier {
        async fn dispatch(&self, _event: NotificationEvent) -> DispatchReport {
            DispatchReport::default()
        }
    }

    fn harness(now: chrono::DateTime<chrono::Utc>) -> (Arc<InMemoryStore>, Arc<FrozenClock>, RuleEvaluator) {
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
        let evaluator = RuleEvaluator::new(store.clone(), store.clone(), store.clone(), engine, clock.clone() as Arc<dyn Clock>);
        (store, clock, evaluator)
    }

    #[tokio::test]
    async fn cpu_threshold_breach_triggers_then_resolves() {
        let now = chrono::Utc::now();
        let (store, clock, evaluator) = harness(now);

        let mut device = Device::new("d1", "d1", DeviceType::Server);
        device.enabled_modules = vec![Module::System];
        device.status = fleetwatch_domain_models::DeviceStatus::Online;
        DeviceStore::upsert(&*store, device).await.unwrap();

        let check = MonitoringCheck::new(
            "c1",
            fleetwatch_domain_models::DeviceId::new("d1"),
            CheckType::Cpu,
            CheckThresholds { warning: 70.0, critical: 90.0, consecutive_failures: 1 },
        );
        RuleStore::upsert(&*store, check).await.unwrap();

        let consolidator = TelemetryConsolidator::new(store.clone(), store.clone(), clock.clone() as Arc<dyn Clock>);
        consolidator
            .consolidate(
                &fleetwatch_domain_models::DeviceId::new("d1"),
                ModulePayload::System(SystemMetricsPayload { cpu_usage: Some(95.0), ..Default::default() }),
            )
            .await;

        evaluator.tick().await;
        assert!(store.list_open().await.iter().any(|a| a.active_key.alert_type == AlertType::RuleViolation));

        clock.advance(Duration::seconds(5));
        consolidator
            .consolidate(
                &fleetwatch_domain_models::DeviceId::new("d1"),
                ModulePayload::System(SystemMetricsPayload { cpu_usage: Some(10.0), ..Default::default() }),
            )
            .await;
        evaluator.tick().await;
        assert!(store.list_open().await.is_empty());
    }
}
