//! Notification channels: SMTP email and chat webhooks.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, VbatchError};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery capability. A failing channel never blocks the others.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short name for logs (`email`, `webhook`, ...).
    fn name(&self) -> &str;

    async fn send(&self, subject: &str, body: &str, severity: Severity) -> Result<()>;
}

fn delivery_error(channel: &str, reason: impl fmt::Display) -> VbatchError {
    VbatchError::Notification {
        channel: channel.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_from() -> String {
    "vbatch@localhost".to_string()
}

/// SMTP destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub address: String,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default = "default_from")]
    pub from: String,
}

impl EmailConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            from: default_from(),
        }
    }
}

/// Plain-text mail over an unauthenticated SMTP relay.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, subject: &str, body: &str, severity: Severity) -> Result<Message> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| delivery_error("email", format!("bad sender {}: {e}", self.config.from)))?;
        let to: Mailbox = self
            .config
            .address
            .parse()
            .map_err(|e| delivery_error("email", format!("bad recipient {}: {e}", self.config.address)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(format!("[vbatch {severity}] {subject}"))
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| delivery_error("email", e))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, subject: &str, body: &str, severity: Severity) -> Result<()> {
        let message = self.build_message(subject, body, severity)?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_host)
            .port(self.config.smtp_port)
            .build();
        mailer
            .send(message)
            .await
            .map_err(|e| delivery_error("email", e))?;
        debug!(to = %self.config.address, "alert email sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chat webhook
// ---------------------------------------------------------------------------

fn default_chat_channel() -> String {
    "#verification".to_string()
}

/// Slack-style incoming webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub webhook_url: String,

    #[serde(default = "default_chat_channel")]
    pub channel: String,
}

impl WebhookConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            channel: default_chat_channel(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    channel: &'a str,
    text: String,
    username: &'a str,
}

pub struct WebhookChannel {
    config: WebhookConfig,
    http_client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("vbatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| delivery_error("webhook", e))?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => ":information_source:",
        Severity::Warning => ":warning:",
        Severity::Critical => ":rotating_light:",
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, subject: &str, body: &str, severity: Severity) -> Result<()> {
        let payload = WebhookPayload {
            channel: &self.config.channel,
            text: format!("{} *{subject}*\n{body}", severity_marker(severity)),
            username: "vbatch",
        };
        self.http_client
            .post(&self.config.webhook_url)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| delivery_error("webhook", e))?;
        debug!(channel = %self.config.channel, "alert webhook posted");
        Ok(())
    }
}
