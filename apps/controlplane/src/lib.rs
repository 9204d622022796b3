//! Control plane bootstrap: wires every domain component together and
//! drives the tick schedule that keeps the fleet's alert, incident, and
//! notification state current.

use std::sync::Arc;

use fleetwatch_core_clock::{spawn_ticker, Clock, ShutdownHandle, SystemClock};
use fleetwatch_domain_alerting::AlertEngine;
use fleetwatch_domain_heartbeat::HeartbeatMonitor;
use fleetwatch_domain_incidents::IncidentAggregator;
use fleetwatch_domain_licensing::LicenseMonitor;
use fleetwatch_domain_models::store::SettingsStore;
use fleetwatch_domain_notification::{ChannelSender, DefaultDispatcher, Notifier};
use fleetwatch_domain_reporting::{effective_interval_minutes, SummaryReporter};
use fleetwatch_domain_rules::RuleEvaluator;
use fleetwatch_domain_synthetics::SyntheticProber;
use fleetwatch_domain_telemetry::TelemetryConsolidator;
use fleetwatch_infra_channels::HttpChannelSender;
use fleetwatch_infra_mqtt::MqttIngress;
use fleetwatch_infra_store::InMemoryStore;
use tokio::time::Duration;

/// Runtime configuration, resolved from CLI flags or their `env`-backed
/// fallbacks (see `.env.example`).
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "FleetWatch IoT fleet monitoring control plane")]
pub struct Config {
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "fleetwatch-controlplane")]
    pub mqtt_client_id: String,

    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long = "timezone", env = "FLEETWATCH_TZ", default_value = "UTC")]
    timezone_name: String,
}

impl Config {
    pub fn from_env() -> Self {
        <Self as clap::Parser>::parse()
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.timezone_name.parse().unwrap_or(chrono_tz::UTC)
    }
}

/// Every wired component plus the shutdown signal the run loop selects
/// against.
pub struct ControlPlane {
    store: Arc<InMemoryStore>,
    clock: Arc<dyn Clock>,
    alert_engine: Arc<AlertEngine>,
    incidents: Arc<IncidentAggregator>,
    telemetry: Arc<TelemetryConsolidator>,
    heartbeat: Arc<HeartbeatMonitor>,
    rules: Arc<RuleEvaluator>,
    synthetics: Arc<SyntheticProber>,
    licensing: Arc<LicenseMonitor>,
    reporting: Arc<SummaryReporter>,
    shutdown_handle: ShutdownHandle,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
    config: Config,
}

impl ControlPlane {
    pub fn bootstrap(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone()));
        let (shutdown_handle, shutdown_rx) = ShutdownHandle::new();

        let sender: Arc<dyn ChannelSender> = Arc::new(HttpChannelSender::new());
        let notifier: Arc<dyn Notifier> =
            Arc::new(DefaultDispatcher::new(store.clone(), sender, clock.clone()));

        let incidents = Arc::new(IncidentAggregator::new(store.clone(), clock.clone()));

        let alert_engine = Arc::new(AlertEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            incidents.clone(),
            clock.clone(),
            store.clone(),
        ));

        let telemetry = Arc::new(TelemetryConsolidator::new(store.clone(), store.clone(), clock.clone()));
        let heartbeat = Arc::new(HeartbeatMonitor::new(store.clone(), alert_engine.clone(), clock.clone()));
        let rules = Arc::new(RuleEvaluator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            alert_engine.clone(),
            clock.clone(),
        ));
        let synthetics = Arc::new(SyntheticProber::new(
            store.clone(),
            alert_engine.clone(),
            incidents.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let licensing = Arc::new(LicenseMonitor::new(store.clone(), incidents.clone(), notifier.clone(), clock.clone()));
        let reporting = Arc::new(SummaryReporter::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
        ));

        Self {
            store,
            clock,
            alert_engine,
            incidents,
            telemetry,
            heartbeat,
            rules,
            synthetics,
            licensing,
            reporting,
            shutdown_handle,
            shutdown_rx,
            config,
        }
    }

    /// Runs until shutdown: reconciles alert state from whatever was
    /// persisted before this process started, spawns every ticker, and
    /// drives the MQTT ingress loop on the calling task.
    pub async fn run(self) {
        self.alert_engine.reconcile_on_startup().await;

        let offline_scan = {
            let heartbeat = self.heartbeat.clone();
            spawn_ticker(Duration::from_secs(30), self.shutdown_rx.clone(), move || {
                let heartbeat = heartbeat.clone();
                async move { heartbeat.scan().await }
            })
        };

        let throttle_tick = {
            let alert_engine = self.alert_engine.clone();
            spawn_ticker(Duration::from_secs(60), self.shutdown_rx.clone(), move || {
                let alert_engine = alert_engine.clone();
                async move { alert_engine.process_throttled_alerts().await }
            })
        };

        let rule_tick = {
            let rules = self.rules.clone();
            spawn_ticker(Duration::from_secs(30), self.shutdown_rx.clone(), move || {
                let rules = rules.clone();
                async move { rules.tick().await }
            })
        };

        let synthetic_tick = {
            let synthetics = self.synthetics.clone();
            spawn_ticker(Duration::from_secs(15), self.shutdown_rx.clone(), move || {
                let synthetics = synthetics.clone();
                async move { synthetics.tick().await }
            })
        };

        let license_tick = {
            let licensing = self.licensing.clone();
            spawn_ticker(Duration::from_secs(15 * 60), self.shutdown_rx.clone(), move || {
                let licensing = licensing.clone();
                async move { licensing.tick().await }
            })
        };

        let summary_interval_minutes = effective_interval_minutes(self.store.get().await.summary_interval_minutes);
        let summary_tick = {
            let reporting = self.reporting.clone();
            spawn_ticker(Duration::from_secs(summary_interval_minutes * 60), self.shutdown_rx.clone(), move || {
                let reporting = reporting.clone();
                async move { reporting.send_digest().await }
            })
        };

        let weekly_tick = {
            let licensing = self.licensing.clone();
            let synthetics = self.synthetics.clone();
            let clock = self.clock.clone();
            let settings_store = self.store.clone();
            spawn_ticker(Duration::from_secs(60 * 60), self.shutdown_rx.clone(), move || {
                let licensing = licensing.clone();
                let synthetics = synthetics.clone();
                let clock = clock.clone();
                let settings_store = settings_store.clone();
                async move {
                    if !clock.is_friday() {
                        return;
                    }
                    let today = clock.today();
                    let mut settings = settings_store.get().await;
                    let mut dirty = false;

                    if settings.ssl_weekly_summary_last_sent_on != Some(today) {
                        synthetics.weekly_summary().await;
                        settings.ssl_weekly_summary_last_sent_on = Some(today);
                        dirty = true;
                    }
                    if settings.license_weekly_summary_last_sent_on != Some(today) {
                        licensing.weekly_summary().await;
                        settings.license_weekly_summary_last_sent_on = Some(today);
                        dirty = true;
                    }

                    if dirty {
                        if let Err(e) = settings_store.upsert(settings).await {
                            tracing::error!(error = %e, "failed to persist weekly-summary send bucket");
                        }
                    }
                }
            })
        };

        let mqtt = MqttIngress::connect(
            &self.config.mqtt_client_id,
            &self.config.mqtt_host,
            self.config.mqtt_port,
            self.telemetry.clone(),
            self.heartbeat.clone(),
            self.alert_engine.clone(),
            self.store.clone(),
            self.clock.clone(),
        );

        let mqtt_run = mqtt.run(self.shutdown_rx.clone());
        tokio::pin!(mqtt_run);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = &mut mqtt_run => {}
            _ = &mut ctrl_c => {
                tracing::info!("SIGINT received, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
            }
        }

        self.shutdown_handle.trigger();
        let _ = tokio::join!(offline_scan, throttle_tick, rule_tick, synthetic_tick, license_tick, summary_tick, weekly_tick);
    }
}
