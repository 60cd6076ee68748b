//! Chat notifications: a titled, colored, field-annotated embed posted to a webhook.
//!
//! Unlike a fire-and-forget channel, delivery failures here propagate: a
//! monitor that cannot deliver an alert must not persist its new state, so the
//! same transition is retried on the next tick.

#![allow(missing_docs)]

use std::time::Duration;

use serde::Serialize;

use crate::core::config::NotifyConfig;
use crate::core::errors::{PervigilError, Result};

// ──────────────────── colors ────────────────────

/// Embed accent color, packed as `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u32);

impl Color {
    pub const GREEN: Self = Self(0x0057_F287);
    pub const YELLOW: Self = Self(0x00FF_FF00);
    pub const RED: Self = Self(0x00ED_4245);
    pub const BLUE: Self = Self(0x0058_65F2);
}

// ──────────────────── notification ────────────────────

/// One inline name/value pair shown under the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Field {
    /// Inline field, the only kind the monitors emit.
    #[must_use]
    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }
}

/// A single alert as produced by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub color: Color,
    pub fields: Vec<Field>,
}

impl Notification {
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>, color: Color) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            color,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(Field::inline(name, value));
        self
    }
}

/// Delivery seam used by every monitor.
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Any failure is a `NotificationFailed` error.
    fn send(&self, notification: &Notification) -> Result<()>;
}

// ──────────────────── webhook payload ────────────────────

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    embeds: [Embed<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    #[serde(skip_serializing_if = "<[Field]>::is_empty")]
    fields: &'a [Field],
    timestamp: String,
}

/// Render the single-embed webhook body.
pub fn render_payload(
    username: &str,
    notification: &Notification,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<String> {
    let payload = WebhookPayload {
        username,
        embeds: [Embed {
            title: &notification.title,
            description: &notification.message,
            color: notification.color.0,
            fields: &notification.fields,
            timestamp: now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }],
    };
    Ok(serde_json::to_string(&payload)?)
}

// ──────────────────── Discord-style webhook ────────────────────

/// Posts notifications to a Discord-compatible incoming webhook.
pub struct WebhookNotifier {
    url: String,
    username: String,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL embeds the webhook secret.
        f.debug_struct("WebhookNotifier")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    /// Build from config; the webhook URL must already be validated as present.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        Self::new(
            config.webhook_url.trim(),
            &config.username,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn new(url: &str, username: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PervigilError::Runtime {
                details: format!("build webhook client: {err}"),
            })?;
        Ok(Self {
            url: url.to_string(),
            username: username.to_string(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        let body = render_payload(&self.username, notification, chrono::Utc::now())?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body)
            .send()
            .map_err(|err| PervigilError::NotificationFailed {
                details: format!("send request: {}", err.without_url()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PervigilError::NotificationFailed {
                details: format!("webhook returned status {}", status.as_u16()),
            });
        }

        tracing::debug!(title = %notification.title, "notification delivered");
        Ok(())
    }
}

// ──────────────────── tests ────────────────────
