use fleetwatch_domain_models::{ActiveKey, AlertType, Severity, SystemSettings, ThrottlePolicy};

/// Alert-type/severity throttle-policy decision table. Overrides passed
/// by the caller always win; this function only covers the
/// alert-type-default and settings-default tiers.
pub fn default_policy(alert_type: AlertType, severity: Severity, settings: &SystemSettings) -> ThrottlePolicy {
    match (alert_type, severity) {
        (AlertType::ServiceDown, _) => ThrottlePolicy { repeat_minutes: 15, throttle_duration_minutes: 60 },
        (AlertType::RuleViolation, Severity::Critical) => {
            ThrottlePolicy { repeat_minutes: 5, throttle_duration_minutes: 0 }
        }
        (AlertType::RuleViolation, _) => ThrottlePolicy { repeat_minutes: 15, throttle_duration_minutes: 60 },
        (AlertType::HighLatency, Severity::Critical) => {
            ThrottlePolicy { repeat_minutes: 5, throttle_duration_minutes: 0 }
        }
        (AlertType::HighLatency, _) => ThrottlePolicy { repeat_minutes: 15, throttle_duration_minutes: 60 },
        (AlertType::Offline, _) => ThrottlePolicy { repeat_minutes: 15, throttle_duration_minutes: 60 },
        _ => ThrottlePolicy {
            repeat_minutes: settings.default_repeat_interval_minutes,
            throttle_duration_minutes: settings.default_throttle_duration_minutes,
        },
    }
}

/// Deterministic incident summary derived from the active-key. The
/// incident-uniqueness guarantee depends on this being stable for a
/// given alert condition.
pub fn incident_summary(key: &ActiveKey) -> String {
    match (&key.specific_service, &key.specific_endpoint) {
        (Some(service), Some(endpoint)) => format!("{:?}: {} ({})", key.alert_type, service, endpoint),
        (Some(service), None) => format!("{:?}: {}", key.alert_type, service),
        (None, Some(endpoint)) => format!("{:?}: {}", key.alert_type, endpoint),
        (None, None) => format!("{:?}", key.alert_type),
    }
}
