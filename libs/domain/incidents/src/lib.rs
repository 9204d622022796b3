//! Incident aggregator.
//!
//! Owns all `Incident` rows. Called by the Alert Engine on every
//! trigger/resolve, by the Synthetic Prober per probe outcome, and by the
//! License Monitor per evaluation; its own errors are absorbed and
//! logged so a persistence hiccup here never blocks notification
//! delivery.

use std::sync::Arc;

use fleetwatch_core_clock::Clock;
use fleetwatch_domain_models::{
    store::IncidentStore, Incident, IncidentStatus, IncidentUpdate, Severity, TargetType,
};

pub struct IncidentAggregator {
    store: Arc<dyn IncidentStore>,
    clock: Arc<dyn Clock>,
}

impl IncidentAggregator {
    pub fn new(store: Arc<dyn IncidentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Finds the open incident with equal (target_type, target_id,
    /// summary). Creates one if absent; upgrades severity and appends an
    /// update if present and the new severity is higher.
    pub async fn ensure_open(
        &self,
        target_type: TargetType,
        target_id: &str,
        summary: &str,
        severity: Severity,
        update_message: impl Into<String>,
    ) {
        let now = self.clock.now();
        let update_message = update_message.into();

        match self.store.find_open(target_type, target_id, summary).await {
            Some(mut incident) => {
                if severity > incident.severity {
                    incident.severity = severity;
                }
                incident.updates.push(IncidentUpdate {
                    at: now,
                    message: update_message,
                });
                if let Err(e) = self.store.upsert(incident).await {
                    tracing::error!(error = %e, "failed to persist incident update");
                }
            }
            None => {
                let incident = Incident {
                    id: format!("{}-{}-{}", target_id, summary, now.timestamp_millis()),
                    target_type,
                    target_id: target_id.to_string(),
                    summary: summary.to_string(),
                    severity,
                    status: IncidentStatus::Open,
                    started_at: now,
                    resolved_at: None,
                    updates: vec![IncidentUpdate { at: now, message: update_message }],
                };
                if let Err(e) = self.store.upsert(incident).await {
                    tracing::error!(error = %e, "failed to persist new incident");
                }
            }
        }
    }

    /// No-op if no matching open incident exists.
    pub async fn resolve(&self, target_type: TargetType, target_id: &str, summary: &str, reason: impl Into<String>) {
        let Some(mut incident) = self.store.find_open(target_type, target_id, summary).await else {
            return;
        };
        let now = self.clock.now();
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(now);
        incident.updates.push(IncidentUpdate { at: now, message: reason.into() });
        if let Err(e) = self.store.upsert(incident).await {
            tracing::error!(error = %e, "failed to persist incident resolution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_core_clock::FrozenClock;
    use fleetwatch_infra_store::InMemoryStore;

    #[tokio::test]
    async fn ensure_open_is_idempotent_per_target_and_summary() {
        let store = Arc::new(InMemoryStore::new());
        let clock = FrozenClock::new(chrono::Utc::now());
        let agg = IncidentAggregator::new(store.clone(), clock);

        agg.ensure_open(TargetType::Device, "d1", "cpu high", Severity::Warning, "first").await;
        agg.ensure_open(TargetType::Device, "d1", "cpu high", Severity::Critical, "second").await;

        let open = store.list_open().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].severity, Severity::Critical);
        assert_eq!(open[0].updates.len(), 2);
    }

    #[tokio::test]
    async fn resolve_is_noop_when_absent() {
        let store = Arc::new(InMemoryStore::new());
        let clock = FrozenClock::new(chrono::Utc::now());
        let agg = IncidentAggregator::new(store.clone(), clock);

        agg.resolve(TargetType::Device, "ghost", "nothing", "reason").await;
        assert!(store.list_open().await.is_empty());
    }
}
