//! Synthetic/SSL prober.
//!
//! One runner covers both the HTTP leg and the SSL leg of a check.
//! `type=http, ssl_enabled=false` never runs the SSL leg, so it can
//! never emit an SSL notification.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fleetwatch_core_clock::{BucketGranularity, Clock};
use fleetwatch_domain_alerting::{AlertEngine, TriggerParams};
use fleetwatch_domain_incidents::IncidentAggregator;
use fleetwatch_domain_models::{
    store::SyntheticCheckStore, ActiveKey, AlertDetails, AlertType, CheckKind, DeviceId, ExpiryState, HttpMethod,
    ResponseMatchType, Severity, SyntheticCheck, TargetType,
};
use fleetwatch_domain_notification::{NotificationEvent, NotificationKind, Notifier};
use fleetwatch_infra_netprobe::{probe_ssl_expiry, run_http_probe, HttpProbeRequest, HttpProbeResult, TlsProbeResult};
use regex::Regex;

#[derive(Debug, Clone)]
struct ProbeOutcome {
    ok: bool,
    severity: Severity,
    message: String,
}

pub struct SyntheticProber {
    check_store: Arc<dyn SyntheticCheckStore>,
    alert_engine: Arc<AlertEngine>,
    incidents: Arc<IncidentAggregator>,
    notifier: Arc<dyn Notifier>,
    http_client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl SyntheticProber {
    pub fn new(
        check_store: Arc<dyn SyntheticCheckStore>,
        alert_engine: Arc<AlertEngine>,
        incidents: Arc<IncidentAggregator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            check_store,
            alert_engine,
            incidents,
            notifier,
            http_client: reqwest::Client::new(),
            clock,
        }
    }

    /// Body of the 15s synthetic ticker: runs every enabled check whose
    /// interval has elapsed.
    pub async fn tick(&self) {
        let now = self.clock.now();
        for check in self.check_store.list_enabled().await {
            if !check.enabled || !check.is_due(now) {
                continue;
            }
            self.run_one(check).await;
        }
    }

    async fn run_one(&self, mut check: SyntheticCheck) {
        let now = self.clock.now();

        let http_outcome = if matches!(check.kind, CheckKind::Http) {
            Some(self.run_http_leg(&check).await)
        } else {
            None
        };

        let tls: Option<TlsProbeResult> = if matches!(check.kind, CheckKind::Ssl) || check.ssl_enabled {
            Some(self.probe_tls(&check).await)
        } else {
            None
        };
        let ssl_outcome = tls.as_ref().map(|t| classify_tls(t, now, check.ssl_expiry_days));

        // Effective result for incident purposes:
        // SSL-only checks use the SSL result; otherwise HTTP failure wins,
        // then SSL failure, then the healthy HTTP result.
        let effective = if matches!(check.kind, CheckKind::Ssl) {
            ssl_outcome.clone().expect("ssl check always runs the ssl leg")
        } else {
            match (&http_outcome, &ssl_outcome) {
                (Some(h), _) if !h.ok => h.clone(),
                (_, Some(s)) if !s.ok => s.clone(),
                (Some(h), _) => h.clone(),
                (None, Some(s)) => s.clone(),
                (None, None) => unreachable!("http check always runs the http leg"),
            }
        };

        check.last_run = Some(now);
        check.last_status = Some(if effective.ok { "ok".to_string() } else { "fail".to_string() });
        check.last_message = Some(effective.message.clone());

        let key = ActiveKey::new(DeviceId::new(format!("synthetic:{}", check.id)), AlertType::ServiceDown)
            .with_service("synthetic")
            .with_endpoint(check.name.clone());

        if effective.ok {
            self.alert_engine
                .resolve_alert(&key, "synthetic check recovered", format!("{} recovered", check.name), effective.message.clone())
                .await;
        } else {
            let details = AlertDetails {
                message: Some(effective.message.clone()),
                ..Default::default()
            };
            let params = TriggerParams::new(
                key,
                effective.severity,
                format!("Synthetic check failing: {}", check.name),
                effective.message.clone(),
            )
            .with_details(details);
            self.alert_engine.trigger_alert(params).await;
        }

        if let (Some(tls), Some(ssl)) = (&tls, &ssl_outcome) {
            self.handle_ssl_lifecycle(&mut check, tls, ssl, now).await;
        }

        if let Err(e) = self.check_store.upsert(check).await {
            tracing::error!(error = %e, "failed to persist synthetic check runtime fields");
        }
    }

    async fn run_http_leg(&self, check: &SyntheticCheck) -> ProbeOutcome {
        let timeout = std::time::Duration::from_millis(check.timeout_ms);
        let result: HttpProbeResult = run_http_probe(
            &self.http_client,
            HttpProbeRequest {
                url: &check.url,
                method: method_str(check.method),
                headers: &check.headers,
                body: check.body.as_deref(),
                timeout,
            },
        )
        .await;

        if let Some(err) = &result.error {
            return ProbeOutcome {
                ok: false,
                severity: Severity::Critical,
                message: format!("request failed: {err}"),
            };
        }

        let status = result.status.unwrap_or(0);
        if !check.expected_status_codes.is_empty() && !check.expected_status_codes.contains(&status) {
            return ProbeOutcome {
                ok: false,
                severity: Severity::Critical,
                message: format!("unexpected status {status}"),
            };
        }

        if let Some(matcher) = &check.response_match {
            let body = result.body.as_deref().unwrap_or("");
            let matched = match matcher.match_type {
                ResponseMatchType::Contains => body.contains(&matcher.value),
                ResponseMatchType::Exact => body.trim() == matcher.value,
                ResponseMatchType::Regex => Regex::new(&matcher.value).map(|re| re.is_match(body)).unwrap_or(false),
            };
            if !matched {
                return ProbeOutcome {
                    ok: false,
                    severity: Severity::Critical,
                    message: "response body did not match expected pattern".to_string(),
                };
            }
        }

        if result.response_time_ms > check.max_response_time_ms {
            return ProbeOutcome {
                ok: false,
                severity: Severity::Warning,
                message: format!("response time {}ms exceeds {}ms", result.response_time_ms, check.max_response_time_ms),
            };
        }

        ProbeOutcome {
            ok: true,
            severity: Severity::Info,
            message: format!("{status} in {}ms", result.response_time_ms),
        }
    }

    async fn probe_tls(&self, check: &SyntheticCheck) -> TlsProbeResult {
        let Some(host) = host_of(&check.url) else {
            return TlsProbeResult { not_after: None, error: Some("could not determine host from url".to_string()) };
        };
        let timeout = std::time::Duration::from_millis(check.timeout_ms);
        probe_ssl_expiry(&host, 443, timeout).await
    }

    /// Renewal detection and reminder-bucket cadence.
    async fn handle_ssl_lifecycle(&self, check: &mut SyntheticCheck, tls: &TlsProbeResult, ssl: &ProbeOutcome, now: DateTime<Utc>) {
        let Some(not_after) = tls.not_after else {
            return;
        };

        if let Some(previous) = check.ssl_expiry_at {
            let renewed = not_after > previous + Duration::hours(1);
            let already_notified = check.ssl_last_renewal_notified_expiry_at == Some(not_after);
            if renewed && !already_notified {
                let event = NotificationEvent::new(
                    NotificationKind::Recovery,
                    Severity::Info,
                    format!("SSL renewed: {}", check.name),
                    format!("Certificate renewed; new expiry {not_after}"),
                );
                self.notifier.dispatch(event).await;
                check.ssl_last_renewal_notified_expiry_at = Some(not_after);
            }
        }
        check.ssl_expiry_at = Some(not_after);

        let days_to_expiry = (not_after - now).num_days();
        let state = classify_expiry(days_to_expiry, check.ssl_expiry_days);
        let summary = format!("SSL expiry: {}", check.name);
        let incident_severity = ssl.severity;

        if state == ExpiryState::Ok {
            if check.ssl_last_state.map(|s| s != ExpiryState::Ok).unwrap_or(false) {
                self.incidents
                    .resolve(TargetType::Synthetic, &check.id, &summary, "certificate renewed or back within horizon")
                    .await;
            }
            check.ssl_last_reminder_bucket = None;
        } else {
            let granularity = if days_to_expiry <= 1 { BucketGranularity::Hour } else { BucketGranularity::Date };
            let bucket = self.clock.bucket_key(granularity);
            let bucket_changed = check.ssl_last_reminder_bucket.as_deref() != Some(bucket.as_str());

            self.incidents
                .ensure_open(TargetType::Synthetic, &check.id, &summary, incident_severity, ssl.message.clone())
                .await;

            if bucket_changed {
                let event = NotificationEvent::new(
                    NotificationKind::Reminder,
                    incident_severity,
                    format!("SSL expiry reminder: {}", check.name),
                    ssl.message.clone(),
                );
                self.notifier.dispatch(event).await;
                check.ssl_last_reminder_bucket = Some(bucket);
            }
        }

        check.ssl_last_state = Some(state);
    }

    /// Weekly fleet-wide digest of checks with an SSL leg currently outside
    /// its `Ok` expiry window, mirroring the license monitor's weekly
    /// summary idiom.
    pub async fn weekly_summary(&self) {
        let checks: Vec<SyntheticCheck> = self
            .check_store
            .list_enabled()
            .await
            .into_iter()
            .filter(|c| c.enabled && (matches!(c.kind, CheckKind::Ssl) || c.ssl_enabled))
            .collect();

        let mut lines = Vec::new();
        for check in &checks {
            if let Some(state) = check.ssl_last_state {
                if state != ExpiryState::Ok {
                    let days = check.ssl_expiry_at.map(|at| (at - self.clock.now()).num_days());
                    match days {
                        Some(d) => lines.push(format!("- {} ({d}d, {state:?})", check.name)),
                        None => lines.push(format!("- {} ({state:?})", check.name)),
                    }
                }
            }
        }

        if lines.is_empty() {
            return;
        }

        let body = format!("{} certificate(s) approaching expiry:\n{}", lines.len(), lines.join("\n"));
        let event = NotificationEvent::new(NotificationKind::Digest, Severity::Warning, "Weekly SSL summary", body);
        self.notifier.dispatch(event).await;
    }
}

fn classify_tls(tls: &TlsProbeResult, now: DateTime<Utc>, warning_horizon_days: i64) -> ProbeOutcome {
    let Some(not_after) = tls.not_after else {
        return ProbeOutcome {
            ok: false,
            severity: Severity::Critical,
            message: tls.error.clone().unwrap_or_else(|| "ssl probe failed".to_string()),
        };
    };

    let days_to_expiry = (not_after - now).num_days();
    let state = classify_expiry(days_to_expiry, warning_horizon_days);
    ProbeOutcome {
        ok: matches!(state, ExpiryState::Ok),
        severity: match state {
            ExpiryState::Ok => Severity::Info,
            ExpiryState::Warning => Severity::Warning,
            ExpiryState::Critical | ExpiryState::Expired => Severity::Critical,
        },
        message: format!("certificate expires in {days_to_expiry} days"),
    }
}

fn classify_expiry(days_to_expiry: i64, warning_horizon_days: i64) -> ExpiryState {
    if days_to_expiry < 0 {
        ExpiryState::Expired
    } else if days_to_expiry <= 1 {
        ExpiryState::Critical
    } else if days_to_expiry <= warning_horizon_days {
        ExpiryState::Warning
    } else {
        ExpiryState::Ok
    }
}

fn method_str(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Get => "GET",
        HttpMethod::Post => "POST",
        HttpMethod::Put => "PUT",
        HttpMethod::Head => "HEAD",
    }
}

fn host_of(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    host_port.split(':').next().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_expiry_buckets_at_day_boundaries() {
        assert_eq!(classify_expiry(-1, 7), ExpiryState::Expired);
        assert_eq!(classify_expiry(0, 7), ExpiryState::Critical);
        assert_eq!(classify_expiry(1, 7), ExpiryState::Critical);
        assert_eq!(classify_expiry(3, 7), ExpiryState::Warning);
        assert_eq!(classify_expiry(7, 7), ExpiryState::Warning);
        assert_eq!(classify_expiry(8, 7), ExpiryState::Ok);
    }

    #[test]
    fn host_of_strips_scheme_path_and_port() {
        assert_eq!(host_of("https://example.com:8443/path"), Some("example.com".to_string()));
        assert_eq!(host_of("example.com"), Some("example.com".to_string()));
    }
}
