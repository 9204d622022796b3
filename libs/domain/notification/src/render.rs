//! Channel-specific payload rendering.

use chrono::Utc;
use fleetwatch_domain_models::Severity;
use serde::Serialize;

use crate::{NotificationEvent, NotificationKind};

#[derive(Debug, Clone, Serialize)]
pub struct SlackAttachment {
    pub color: &'static str,
    pub text: String,
    pub footer: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackPayload {
    pub username: &'static str,
    pub icon_emoji: &'static str,
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub channel: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RenderedPayload {
    Slack(SlackPayload),
    Webhook(WebhookPayload),
    PlainText(String),
}

/// `color=danger` iff severity=critical; `warning` iff warning; `good`
/// iff info/recovery.
fn slack_color(event: &NotificationEvent) -> &'static str {
    if event.kind == NotificationKind::Recovery {
        return "good";
    }
    match event.severity {
        Severity::Critical => "danger",
        Severity::Warning => "warning",
        Severity::Info => "good",
    }
}

pub fn slack_payload(event: &NotificationEvent, now: chrono::DateTime<Utc>) -> SlackPayload {
    SlackPayload {
        username: "FleetWatch",
        icon_emoji: ":satellite:",
        attachments: vec![SlackAttachment {
            color: slack_color(event),
            text: format!("*{}*\n{}", event.title, event.body),
            footer: "fleetwatch-control-plane".to_string(),
            ts: now.timestamp(),
        }],
    }
}

pub fn webhook_payload(event: &NotificationEvent, channel_id: &str, now: chrono::DateTime<Utc>) -> WebhookPayload {
    WebhookPayload {
        channel: channel_id.to_string(),
        message: format!("{}: {}", event.title, event.body),
        severity: event.severity,
        timestamp: now,
    }
}

/// Shared plain-text rendering used for email/SMS/WhatsApp, all of which
/// "must present the same rendered text body".
pub fn plain_text(event: &NotificationEvent) -> String {
    format!("{}\n\n{}", event.title, event.body)
}
