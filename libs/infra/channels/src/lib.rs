//! Outbound notification I/O (the `ChannelSender` seam defined in
//! `fleetwatch-domain-notification`). Slack and generic webhooks are real
//! HTTP sends; email/SMS/WhatsApp/call_api share one plain-text stub since
//! no concrete provider SDK is integrated for those channels yet.

use async_trait::async_trait;
use fleetwatch_domain_models::{ChannelType, NotificationChannel};
use fleetwatch_domain_notification::{ChannelSender, RenderedPayload, SendError};

const WEBHOOK_URL_KEY: &str = "webhook_url";

pub struct HttpChannelSender {
    client: reqwest::Client,
}

impl HttpChannelSender {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpChannelSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(&self, channel: &NotificationChannel, payload: &RenderedPayload) -> Result<(), SendError> {
        match (channel.channel_type, payload) {
            (ChannelType::Slack, RenderedPayload::Slack(slack)) => self.post_json(channel, slack).await,
            (ChannelType::Webhook, RenderedPayload::Webhook(webhook)) => self.post_json(channel, webhook).await,
            (ChannelType::Email | ChannelType::Sms | ChannelType::Whatsapp | ChannelType::CallApi, RenderedPayload::PlainText(text)) => {
                self.send_plain(channel, text).await
            }
            (channel_type, _) => Err(SendError(format!("no sender for channel type {channel_type:?} with this payload shape"))),
        }
    }
}

impl HttpChannelSender {
    async fn post_json<T: serde::Serialize + ?Sized>(&self, channel: &NotificationChannel, body: &T) -> Result<(), SendError> {
        let url = channel
            .config
            .get(WEBHOOK_URL_KEY)
            .ok_or_else(|| SendError(format!("channel {} has no {WEBHOOK_URL_KEY} configured", channel.id)))?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| SendError(format!("webhook POST failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SendError(format!("webhook returned status {}", response.status())));
        }
        Ok(())
    }

    /// Every non-webhook channel (email/SMS/WhatsApp/call_api) is logged
    /// rather than delivered since no SMTP/SMS/voice provider is wired up,
    /// but the seam stays real so a future adapter only needs to fill in
    /// this one match arm.
    async fn send_plain(&self, channel: &NotificationChannel, text: &str) -> Result<(), SendError> {
        tracing::info!(channel = %channel.id, channel_type = ?channel.channel_type, body = %text, "dispatching via unintegrated provider channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_domain_models::{AlertTypeFilter, Severity};
    use fleetwatch_domain_notification::render::plain_text;
    use fleetwatch_domain_notification::{NotificationEvent, NotificationKind};
    use std::collections::BTreeMap;

    fn channel(channel_type: ChannelType) -> NotificationChannel {
        NotificationChannel {
            id: "c1".to_string(),
            channel_type,
            enabled: true,
            is_default: true,
            alert_types: AlertTypeFilter::default(),
            severity_levels: vec![],
            device_filters: vec![],
            config: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn webhook_without_configured_url_fails_without_panicking() {
        let sender = HttpChannelSender::new();
        let channel = channel(ChannelType::Webhook);
        let event = NotificationEvent::new(NotificationKind::Alert, Severity::Critical, "t", "b");
        let payload = RenderedPayload::Webhook(fleetwatch_domain_notification::render::webhook_payload(&event, &channel.id, chrono::Utc::now()));
        let result = sender.send(&channel, &payload).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn email_channel_never_errors() {
        let sender = HttpChannelSender::new();
        let channel = channel(ChannelType::Email);
        let event = NotificationEvent::new(NotificationKind::Alert, Severity::Warning, "t", "b");
        let payload = RenderedPayload::PlainText(plain_text(&event));
        let result = sender.send(&channel, &payload).await;
        assert!(result.is_ok());
    }
}
