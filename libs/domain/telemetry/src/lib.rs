//! Telemetry consolidator.
//!
//! Folds one ingested module payload into the most recent Telemetry
//! record for a device, or opens a new one, serialized per device so
//! concurrent MQTT deliveries never lose an update.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use fleetwatch_core_clock::Clock;
use fleetwatch_domain_models::{
    store::{DeviceStore, TelemetryStore},
    DeviceId, Module, ModulePayload, Telemetry,
};
use tokio::sync::Mutex;

/// Payloads within this window of the most recent record for a device are
/// folded into it rather than starting a new one.
pub const CONSOLIDATION_WINDOW: Duration = Duration::seconds(2);

pub struct TelemetryConsolidator {
    telemetry_store: Arc<dyn TelemetryStore>,
    device_store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    locks: DashMap<DeviceId, Arc<Mutex<()>>>,
}

impl TelemetryConsolidator {
    pub fn new(telemetry_store: Arc<dyn TelemetryStore>, device_store: Arc<dyn DeviceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            telemetry_store,
            device_store,
            clock,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, device_id: &DeviceId) -> Arc<Mutex<()>> {
        self.locks.entry(device_id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Consolidates `payload` into `device_id`'s current Telemetry record,
    /// mirrors any static device facts it carries, and returns the stored
    /// record.
    pub async fn consolidate(&self, device_id: &DeviceId, payload: ModulePayload) -> Telemetry {
        let device_lock = self.lock_for(device_id);
        let _guard = device_lock.lock().await;

        let now = self.clock.now();
        let mut record = match self.telemetry_store.latest(device_id).await {
            Some(existing) if now - existing.timestamp <= CONSOLIDATION_WINDOW => existing,
            _ => Telemetry::new(device_id.clone(), now),
        };
        record.timestamp = now;

        let module = match &payload {
            ModulePayload::System(_) => Module::System,
            ModulePayload::Network(_) => Module::Network,
            ModulePayload::Docker(_) => Module::Docker,
            ModulePayload::Asterisk(_) => Module::Asterisk,
        };

        let mut device_facts: Option<(Option<String>, Option<String>, Vec<String>)> = None;

        match payload {
            ModulePayload::System(system) => {
                record.cpu_usage = system.cpu_usage.or(system.cpu_percent).or(system.cpu_load);
                record.memory_usage = system.memory_usage.or(system.memory_used_percent);
                record.disk_usage = system
                    .disks
                    .first()
                    .map(|d| d.usage_percent)
                    .or(system.disk_usage);
                record.extra.disks = system.disks.clone();
                device_facts = Some((system.hostname.clone(), None, Vec::new()));
            }
            ModulePayload::Network(network) => {
                record.network_in_bps = Some(network.interfaces.iter().map(|i| i.rx_bps).sum());
                record.network_out_bps = Some(network.interfaces.iter().map(|i| i.tx_bps).sum());
                record.extra.interfaces = network.interfaces.clone();
                record.extra.ping_results = network.ping_results.clone();
                device_facts = Some((None, network.public_ip.clone(), network.local_ips.clone()));
            }
            ModulePayload::Docker(docker) => {
                record.extra.docker = Some(docker);
            }
            ModulePayload::Asterisk(asterisk) => {
                record.extra.contacts = asterisk.contacts;
                record.extra.registrations = asterisk.registrations;
                record.extra.asterisk_summary = asterisk.summary;
            }
        }

        if let Err(e) = self.telemetry_store.upsert(record.clone()).await {
            tracing::error!(error = %e, device_id = %device_id, "failed to persist telemetry");
        }

        if let Ok(mut device) = self.device_store.get(device_id).await {
            device.last_successful_metrics.insert(module, now);
            if let Some((hostname, public_ip, local_ips)) = device_facts {
                if hostname.is_some() {
                    device.hostname = hostname;
                }
                if public_ip.is_some() {
                    device.public_ip = public_ip;
                }
                if !local_ips.is_empty() {
                    device.local_ips = local_ips;
                }
            }
            if let Err(e) = self.device_store.upsert(device).await {
                tracing::error!(error = %e, device_id = %device_id, "failed to persist device facts");
            }
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core_clock::FrozenClock;
    use fleetwatch_domain_models::{Device, DeviceType, SystemMetricsPayload};
    use fleetwatch_infra_store::InMemoryStore;

    fn harness(now: chrono::DateTime<chrono::Utc>) -> (Arc<InMemoryStore>, Arc<FrozenClock>, TelemetryConsolidator) {
        let store = Arc::new(InMemoryStore::new());
        let clock = FrozenClock::new(now);
        let telemetry_store: Arc<dyn TelemetryStore> = store.clone();
        let device_store: Arc<dyn DeviceStore> = store.clone();
        let consolidator_clock: Arc<dyn Clock> = clock.clone();
        let consolidator = TelemetryConsolidator::new(telemetry_store, device_store, consolidator_clock);
        (store, clock, consolidator)
    }

    #[tokio::test]
    async fn payloads_within_window_fold_into_one_record() {
        let now = chrono::Utc::now();
        let (store, clock, consolidator) = harness(now);
        store.upsert(Device::new("d1", "d1", DeviceType::Server)).await.unwrap();

        consolidator
            .consolidate(
                &DeviceId::new("d1"),
                ModulePayload::System(SystemMetricsPayload { cpu_usage: Some(42.0), ..Default::default() }),
            )
            .await;
        clock.advance(Duration::seconds(1));
        let second = consolidator
            .consolidate(
                &DeviceId::new("d1"),
                ModulePayload::System(SystemMetricsPayload { memory_usage: Some(55.0), ..Default::default() }),
            )
            .await;

        assert_eq!(second.cpu_usage, Some(42.0));
        assert_eq!(second.memory_usage, Some(55.0));
        assert!(TelemetryStore::latest(&*store, &DeviceId::new("d1")).await.is_some());
    }

    #[tokio::test]
    async fn payload_past_window_opens_new_record() {
        let now = chrono::Utc::now();
        let (store, clock, consolidator) = harness(now);
        store.upsert(Device::new("d1", "d1", DeviceType::Server)).await.unwrap();

        consolidator
            .consolidate(
                &DeviceId::new("d1"),
                ModulePayload::System(SystemMetricsPayload { cpu_usage: Some(42.0), ..Default::default() }),
            )
            .await;
        clock.advance(Duration::seconds(3));
        let second = consolidator
            .consolidate(
                &DeviceId::new("d1"),
                ModulePayload::System(SystemMetricsPayload { memory_usage: Some(55.0), ..Default::default() }),
            )
            .await;

        assert_eq!(second.cpu_usage, None, "a fresh record does not inherit the prior window's scalars");
        assert_eq!(second.memory_usage, Some(55.0));
    }

    #[tokio::test]
    async fn docker_payload_replaces_extra_docker_wholesale() {
        let now = chrono::Utc::now();
        let (store, _clock, consolidator) = harness(now);
        store.upsert(Device::new("d1", "d1", DeviceType::Server)).await.unwrap();

        consolidator
            .consolidate(&DeviceId::new("d1"), ModulePayload::Docker(Default::default()))
            .await;
        let device = DeviceStore::get(&*store, &DeviceId::new("d1")).await.unwrap();
        assert_eq!(device.last_successful_metrics.get(&Module::Docker), Some(&now));
    }
}
