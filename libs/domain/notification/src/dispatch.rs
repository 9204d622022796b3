use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_core_clock::Clock;
use fleetwatch_domain_models::{store::ChannelStore, ChannelType, NotificationChannel};

use crate::render::{plain_text, slack_payload, webhook_payload, RenderedPayload};
use crate::{NotificationEvent, NotificationKind};

#[derive(Debug, Clone)]
pub struct SendError(pub String);

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SendError {}

/// The per-channel I/O seam implemented by `fleetwatch-infra-channels`.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, channel: &NotificationChannel, payload: &RenderedPayload) -> Result<(), SendError>;
}

#[derive(Debug, Clone)]
pub struct ChannelDispatchOutcome {
    pub channel_id: String,
    pub channel_type: ChannelType,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelDispatchOutcome>,
}

impl DispatchReport {
    pub fn any_succeeded(&self) -> bool {
        self.outcomes.iter().any(|o| o.ok)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, event: NotificationEvent) -> DispatchReport;
}

/// Resolves target channels, renders a payload per channel type, and fans
/// out in parallel with a per-send timeout — one channel's failure never
/// blocks or fails another.
pub struct DefaultDispatcher {
    channel_store: Arc<dyn ChannelStore>,
    sender: Arc<dyn ChannelSender>,
    clock: Arc<dyn Clock>,
    send_timeout: Duration,
}

impl DefaultDispatcher {
    pub fn new(channel_store: Arc<dyn ChannelStore>, sender: Arc<dyn ChannelSender>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channel_store,
            sender,
            clock,
            send_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    fn select_channels(&self, event: &NotificationEvent, enabled: &[NotificationChannel]) -> Vec<NotificationChannel> {
        if let Some(ids) = &event.channel_override {
            return enabled.iter().filter(|c| ids.contains(&c.id)).cloned().collect();
        }

        // Digest events are not scoped by a single alert
        // type, so the alert-type filter is skipped for them.
        let matching: Vec<NotificationChannel> = enabled
            .iter()
            .filter(|c| {
                let alert_type_ok = match event.alert_type {
                    Some(at) => c.alert_types.matches(at),
                    None => event.kind == NotificationKind::Digest,
                };
                alert_type_ok && c.matches_severity(event.severity)
            })
            .cloned()
            .collect();

        if matching.is_empty() && !enabled.is_empty() {
            enabled.iter().filter(|c| c.is_default).cloned().collect()
        } else {
            matching
        }
    }

    fn render_for(&self, channel: &NotificationChannel, event: &NotificationEvent) -> RenderedPayload {
        match channel.channel_type {
            ChannelType::Slack => RenderedPayload::Slack(slack_payload(event, self.clock.now())),
            ChannelType::Webhook => RenderedPayload::Webhook(webhook_payload(event, &channel.id, self.clock.now())),
            ChannelType::Email | ChannelType::Sms | ChannelType::Whatsapp | ChannelType::CallApi => {
                RenderedPayload::PlainText(plain_text(event))
            }
        }
    }
}

#[async_trait]
impl Notifier for DefaultDispatcher {
    async fn dispatch(&self, event: NotificationEvent) -> DispatchReport {
        let enabled = self.channel_store.list_enabled().await;
        let targets = self.select_channels(&event, &enabled);

        let sends = targets.into_iter().map(|channel| {
            let sender = self.sender.clone();
            let payload = self.render_for(&channel, &event);
            let timeout = self.send_timeout;
            async move {
                let result = tokio::time::timeout(timeout, sender.send(&channel, &payload)).await;
                match result {
                    Ok(Ok(())) => ChannelDispatchOutcome {
                        channel_id: channel.id,
                        channel_type: channel.channel_type,
                        ok: true,
                        error: None,
                    },
                    Ok(Err(e)) => {
                        tracing::warn!(channel = %channel.id, error = %e, "notification send failed");
                        ChannelDispatchOutcome {
                            channel_id: channel.id,
                            channel_type: channel.channel_type,
                            ok: false,
                            error: Some(e.to_string()),
                        }
                    }
                    Err(_) => {
                        tracing::warn!(channel = %channel.id, "notification send timed out");
                        ChannelDispatchOutcome {
                            channel_id: channel.id,
                            channel_type: channel.channel_type,
                            ok: false,
                            error: Some("timed out".to_string()),
                        }
                    }
                }
            }
        });

        let outcomes = futures::future::join_all(sends).await;
        DispatchReport { outcomes }
    }
}
