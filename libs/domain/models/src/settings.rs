use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Singleton fleet-wide defaults and cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    pub default_offline_threshold_multiplier: f64,
    pub default_repeat_interval_minutes: i64,
    pub default_throttle_duration_minutes: i64,
    pub monitoring_check_interval_seconds: u64,
    pub summary_interval_minutes: u64,
    pub ssl_weekly_summary_last_sent_on: Option<NaiveDate>,
    pub license_weekly_summary_last_sent_on: Option<NaiveDate>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            default_offline_threshold_multiplier: 4.0,
            default_repeat_interval_minutes: 5,
            default_throttle_duration_minutes: 60,
            monitoring_check_interval_seconds: 30,
            summary_interval_minutes: 360,
            ssl_weekly_summary_last_sent_on: None,
            license_weekly_summary_last_sent_on: None,
        }
    }
}
