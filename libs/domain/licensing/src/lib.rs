//! License monitor.
//!
//! Mirrors the synthetic prober's SSL-expiry state machine
//! but against `renewal_date` instead of a certificate's `notAfter`, and
//! with per-asset warning/critical horizons instead of one shared default.

use std::sync::Arc;

use fleetwatch_core_clock::{BucketGranularity, Clock};
use fleetwatch_domain_incidents::IncidentAggregator;
use fleetwatch_domain_models::{
    store::LicenseStore, ExpiryState, LicenseAsset, LicenseStatus, Severity, TargetType,
};
use fleetwatch_domain_notification::{NotificationEvent, NotificationKind, Notifier};

pub struct LicenseMonitor {
    store: Arc<dyn LicenseStore>,
    incidents: Arc<IncidentAggregator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl LicenseMonitor {
    pub fn new(store: Arc<dyn LicenseStore>, incidents: Arc<IncidentAggregator>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self { store, incidents, notifier, clock }
    }

    /// Body of the 15-minute license ticker.
    pub async fn tick(&self) {
        let now = self.clock.now();
        for mut asset in self.store.list_enabled().await {
            if asset.status != LicenseStatus::Active {
                continue;
            }

            let days_to_renewal = (asset.renewal_date - now).num_days();
            let state = classify(days_to_renewal, asset.warning_days, asset.critical_days);
            let summary = format!("License renewal: {}", asset.name);

            if state == ExpiryState::Ok {
                if asset.last_state.map(|s| s != ExpiryState::Ok).unwrap_or(false) {
                    self.incidents.resolve(TargetType::License, &asset.id, &summary, "renewal date moved back within horizon").await;
                }
                asset.last_notified_bucket = None;
            } else {
                let severity = severity_for(state);
                let message = format!("{} expires in {days_to_renewal} days", asset.name);

                self.incidents.ensure_open(TargetType::License, &asset.id, &summary, severity, message.clone()).await;

                let granularity = if days_to_renewal <= 1 { BucketGranularity::Hour } else { BucketGranularity::Date };
                let bucket = self.clock.bucket_key(granularity);
                if asset.last_notified_bucket.as_deref() != Some(bucket.as_str()) {
                    let event = NotificationEvent::new(NotificationKind::Reminder, severity, format!("License expiring: {}", asset.name), message);
                    self.notifier.dispatch(event).await;
                    asset.last_notified_bucket = Some(bucket);
                }
            }

            asset.last_state = Some(state);
            if let Err(e) = self.store.upsert(asset).await {
                tracing::error!(error = %e, "failed to persist license runtime fields");
            }
        }
    }

    /// Weekly fleet-wide digest body: one notification listing every
    /// license not in `Ok` state, grouped by severity.
    pub async fn weekly_summary(&self) {
        let assets: Vec<LicenseAsset> = self
            .store
            .list_enabled()
            .await
            .into_iter()
            .filter(|a| a.status == LicenseStatus::Active)
            .collect();

        let now = self.clock.now();
        let mut lines = Vec::new();
        for asset in &assets {
            let days_to_renewal = (asset.renewal_date - now).num_days();
            let state = classify(days_to_renewal, asset.warning_days, asset.critical_days);
            if state != ExpiryState::Ok {
                lines.push(format!("- {} ({days_to_renewal}d, {state:?})", asset.name));
            }
        }

        if lines.is_empty() {
            return;
        }

        let body = format!("{} license(s) approaching renewal:\n{}", lines.len(), lines.join("\n"));
        let event = NotificationEvent::new(NotificationKind::Digest, Severity::Warning, "Weekly license summary", body);
        self.notifier.dispatch(event).await;
    }
}

fn classify(days_to_expiry: i64, warning_days: i64, critical_days: i64) -> ExpiryState {
    if days_to_expiry < 0 {
        ExpiryState::Expired
    } else if days_to_expiry <= critical_days {
        ExpiryState::Critical
    } else if days_to_expiry <= warning_days {
        ExpiryState::Warning
    } else {
        ExpiryState::Ok
    }
}

fn severity_for(state: ExpiryState) -> Severity {
    match state {
        ExpiryState::Ok => Severity::Info,
        ExpiryState::Warning => Severity::Warning,
        ExpiryState::Critical | ExpiryState::Expired => Severity::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use fleetwatch_core_clock::FrozenClock;
    use fleetwatch_infra_store::InMemoryStore;

    fn asset(id: &str, renewal_in_days: i64) -> LicenseAsset {
        LicenseAsset {
            id: id.to_string(),
            name: id.to_string(),
            renewal_date: Utc::now() + Duration::days(renewal_in_days),
            warning_days: 30,
            critical_days: 7,
            enabled: true,
            status: LicenseStatus::Active,
            last_state: None,
            last_notified_bucket: None,
            channel_ids: vec![],
        }
    }

    #[tokio::test]
    async fn approaching_renewal_opens_incident_and_sends_once_per_bucket() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert(asset("lic-1", 10)).await.unwrap();
        let clock = FrozenClock::new(Utc::now());
        let incidents = Arc::new(IncidentAggregator::new(store.clone(), clock.clone()));
        let notifier = Arc::new(NullNotifier::default());
        let monitor = LicenseMonitor::new(store.clone(), incidents, notifier.clone(), clock);

        monitor.tick().await;
        monitor.tick().await;

        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn expired_license_classifies_as_expired() {
        assert_eq!(classify(-1, 30, 7), ExpiryState::Expired);
        assert_eq!(classify(5, 30, 7), ExpiryState::Critical);
        assert_eq!(classify(20, 30, 7), ExpiryState::Warning);
        assert_eq!(classify(40, 30, 7), ExpiryState::Ok);
    }

    #[derive(Default, Clone)]
    struct NullNotifier {
        sent: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl NullNotifier {
        fn count(&self) -> usize {
            self.sent.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl fleetwatch_domain_notification::Notifier for NullNotifier {
        async fn dispatch(&self, _event: fleetwatch_domain_notification::NotificationEvent) -> fleetwatch_domain_notification::DispatchReport {
            self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            fleetwatch_domain_notification::DispatchReport::default()
        }
    }
}
