//! Notification dispatcher.

pub mod dispatch;
pub mod render;

pub use dispatch::{ChannelDispatchOutcome, ChannelSender, DefaultDispatcher, DispatchReport, Notifier, SendError};
pub use render::{RenderedPayload, SlackAttachment, SlackPayload, WebhookPayload};

use std::collections::BTreeMap;

use fleetwatch_domain_models::{AlertType, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Recovery,
    Reminder,
    Digest,
}

/// The payload-agnostic event every component hands to the dispatcher.
/// Channel-specific rendering happens inside `render` from this one
/// representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub alert_type: Option<AlertType>,
    pub context: BTreeMap<String, String>,
    /// When set, bypasses channel-filter resolution and sends to exactly
    /// these channel ids.
    pub channel_override: Option<Vec<String>>,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            title: title.into(),
            body: body.into(),
            alert_type: None,
            context: BTreeMap::new(),
            channel_override: None,
        }
    }

    pub fn with_alert_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }
}
