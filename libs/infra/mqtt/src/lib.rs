//! MQTT ingress adapter. Owns the `rumqttc`
//! client/eventloop pair, parses inbound topics, decodes payloads, and
//! dispatches into the telemetry consolidator, heartbeat monitor, and
//! alert engine. Grounded directly on the irrigation-hub example's
//! `AsyncClient`/`EventLoop` select loop and its re-subscribe-on-`ConnAck`
//! pattern.

use std::sync::Arc;
use std::time::Duration;

use fleetwatch_core_clock::Clock;
use fleetwatch_domain_alerting::{AlertEngine, TriggerParams};
use fleetwatch_domain_heartbeat::HeartbeatMonitor;
use fleetwatch_domain_models::{
    store::DeviceStore, ActiveKey, AlertType, AsteriskMetricsPayload, DeviceId, DockerMetricsPayload, ModulePayload,
    NetworkMetricsPayload, Severity, SystemMetricsPayload,
};
use fleetwatch_domain_telemetry::TelemetryConsolidator;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};

const STATUS_WILDCARD: &str = "iotmonitor/device/+/status";
const METRICS_WILDCARD: &str = "iotmonitor/device/+/metrics/+";
const RESPONSES_WILDCARD: &str = "iotmonitor/device/+/responses";
const SERVER_STATUS_TOPIC: &str = "iotmonitor/server/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicKind {
    Status,
    MetricsSystem,
    MetricsNetwork,
    MetricsDocker,
    MetricsAsterisk,
    Responses,
}

/// Splits `iotmonitor/device/{id}/...` into its device id and topic kind.
/// Anything that doesn't match the contract is `None`.
fn parse_topic(topic: &str) -> Option<(DeviceId, TopicKind)> {
    let mut parts = topic.split('/');
    if parts.next()? != "iotmonitor" {
        return None;
    }
    if parts.next()? != "device" {
        return None;
    }
    let device_id = parts.next()?;

    let kind = match parts.next()? {
        "status" if parts.next().is_none() => TopicKind::Status,
        "metrics" => {
            let module = parts.next()?;
            if parts.next().is_some() {
                return None;
            }
            match module {
                "system" => TopicKind::MetricsSystem,
                "network" => TopicKind::MetricsNetwork,
                "docker" => TopicKind::MetricsDocker,
                "asterisk" => TopicKind::MetricsAsterisk,
                _ => return None,
            }
        }
        "responses" if parts.next().is_none() => TopicKind::Responses,
        _ => return None,
    };

    Some((DeviceId::new(device_id), kind))
}

pub struct MqttIngress {
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    consolidator: Arc<TelemetryConsolidator>,
    heartbeat: Arc<HeartbeatMonitor>,
    alert_engine: Arc<AlertEngine>,
    device_store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
}

impl MqttIngress {
    /// Connects with `clean_session(false)` plus a `LastWill` so a
    /// broker-side session survives our own restarts and the broker
    /// announces our disconnect.
    pub fn connect(
        client_id: &str,
        broker_host: &str,
        broker_port: u16,
        consolidator: Arc<TelemetryConsolidator>,
        heartbeat: Arc<HeartbeatMonitor>,
        alert_engine: Arc<AlertEngine>,
        device_store: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut options = MqttOptions::new(client_id, broker_host, broker_port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(false);
        options.set_last_will(LastWill::new(SERVER_STATUS_TOPIC, b"offline".to_vec(), QoS::AtLeastOnce, false));

        let (client, eventloop) = AsyncClient::new(options, 64);
        Self { client, eventloop, consolidator, heartbeat, alert_engine, device_store, clock }
    }

    /// Drives the event loop until `shutdown` fires. Reconnects are
    /// handled transparently by `rumqttc`; every `ConnAck` re-subscribes
    /// the full wildcard set since a broker-side session loss silently
    /// drops subscriptions.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            self.handle_publish(&publish.topic, &publish.payload, publish.retain).await;
                        }
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!("mqtt connected");
                            for topic in [STATUS_WILDCARD, METRICS_WILDCARD, RESPONSES_WILDCARD] {
                                if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
                                    tracing::error!(topic, error = %e, "re-subscribe failed");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            tracing::warn!("mqtt disconnected");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "mqtt eventloop error, will retry on next poll");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_publish(&self, topic: &str, payload: &[u8], retained: bool) {
        let Some((device_id, kind)) = parse_topic(topic) else {
            tracing::warn!(topic, "unrecognized mqtt topic");
            return;
        };

        match kind {
            TopicKind::Status => {
                let Ok(status) = std::str::from_utf8(payload) else {
                    tracing::warn!(topic, "status payload was not valid utf-8");
                    return;
                };
                self.heartbeat.handle_explicit_status(&device_id, status, retained).await;
            }
            TopicKind::MetricsSystem => {
                let Ok(payload) = serde_json::from_slice::<SystemMetricsPayload>(payload) else {
                    tracing::warn!(topic, "malformed system metrics payload");
                    return;
                };
                self.consolidator.consolidate(&device_id, ModulePayload::System(payload)).await;
                self.heartbeat.record_heartbeat(&device_id, self.clock.now()).await;
            }
            TopicKind::MetricsNetwork => {
                let Ok(payload) = serde_json::from_slice::<NetworkMetricsPayload>(payload) else {
                    tracing::warn!(topic, "malformed network metrics payload");
                    return;
                };
                self.handle_network_metrics(&device_id, payload).await;
                self.heartbeat.record_heartbeat(&device_id, self.clock.now()).await;
            }
            TopicKind::MetricsDocker => {
                let Ok(payload) = serde_json::from_slice::<DockerMetricsPayload>(payload) else {
                    tracing::warn!(topic, "malformed docker metrics payload");
                    return;
                };
                self.consolidator.consolidate(&device_id, ModulePayload::Docker(payload)).await;
                self.heartbeat.record_heartbeat(&device_id, self.clock.now()).await;
            }
            TopicKind::MetricsAsterisk => {
                let Ok(payload) = serde_json::from_slice::<AsteriskMetricsPayload>(payload) else {
                    tracing::warn!(topic, "malformed asterisk metrics payload");
                    return;
                };
                self.consolidator.consolidate(&device_id, ModulePayload::Asterisk(payload)).await;
                self.heartbeat.record_heartbeat(&device_id, self.clock.now()).await;
            }
            TopicKind::Responses => {
                tracing::debug!(topic, device_id = %device_id, "command response relayed (terminal relay only)");
            }
        }
    }

    /// Detects a public-IP change before the consolidator overwrites the
    /// device's recorded IP, and fires `ip_change` when it differs.
    async fn handle_network_metrics(&self, device_id: &DeviceId, payload: NetworkMetricsPayload) {
        let previous_ip = self.device_store.get(device_id).await.ok().and_then(|d| d.public_ip);
        let new_ip = payload.public_ip.clone();

        self.consolidator.consolidate(device_id, ModulePayload::Network(payload)).await;

        if let (Some(previous), Some(current)) = (&previous_ip, &new_ip) {
            if previous != current {
                let key = ActiveKey::new(device_id.clone(), AlertType::IpChange);
                let params = TriggerParams::new(
                    key,
                    Severity::Info,
                    format!("IP changed: {device_id}"),
                    format!("Public IP changed from {previous} to {current}"),
                );
                self.alert_engine.trigger_alert(params).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_metrics_topics() {
        assert_eq!(parse_topic("iotmonitor/device/d1/status"), Some((DeviceId::new("d1"), TopicKind::Status)));
        assert_eq!(
            parse_topic("iotmonitor/device/d1/metrics/system"),
            Some((DeviceId::new("d1"), TopicKind::MetricsSystem))
        );
        assert_eq!(
            parse_topic("iotmonitor/device/d1/metrics/asterisk"),
            Some((DeviceId::new("d1"), TopicKind::MetricsAsterisk))
        );
        assert_eq!(parse_topic("iotmonitor/device/d1/responses"), Some((DeviceId::new("d1"), TopicKind::Responses)));
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert_eq!(parse_topic("iotmonitor/device/d1/metrics/unknown"), None);
        assert_eq!(parse_topic("iotmonitor/server/status"), None);
        assert_eq!(parse_topic("iotmonitor/device/d1/commands/extra"), None);
    }
}
