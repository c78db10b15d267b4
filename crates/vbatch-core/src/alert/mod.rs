//! Threshold alerting with persisted cooldowns.
//!
//! Each [`AlertRule`] is evaluated independently against an
//! [`AggregateReport`]. A rule whose condition holds and whose alert type is
//! not cooling down claims a dispatch (the cooldown timestamp is written
//! first) and then fans out to every channel concurrently. Claims are
//! serialized by an async mutex, so two evaluations racing on the same report
//! deliver at most once per cooldown window.

pub mod channel;
pub mod cooldown;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use vbatch_state::{load, save, StateStore};

use crate::domain::AggregateReport;
use crate::error::Result;
use crate::metrics::METRICS;
use crate::obs;

pub use channel::{
    EmailChannel, EmailConfig, NotificationChannel, Severity, WebhookChannel, WebhookConfig,
};
pub use cooldown::{CooldownState, COOLDOWN_KEY};

pub const CONFIG_KEY: &str = "alerts/config";

pub const DEFAULT_THRESHOLD: u64 = 80;
pub const DEFAULT_COOLDOWN_SECS: u64 = 3600;

/// What a rule's threshold is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdKind {
    /// Unverified job count (failed + timeout + missing + partial) `>=` value.
    Count,

    /// Success rate percentage `<` value.
    Rate,

    /// Some job's duration in seconds `>` value.
    Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub alert_type: String,
    pub threshold_kind: ThresholdKind,
    pub threshold_value: f64,
    pub severity: Severity,

    /// Template; see [`AlertRule::render`] for placeholders.
    pub message: String,
}

impl AlertRule {
    pub fn holds(&self, report: &AggregateReport) -> bool {
        match self.threshold_kind {
            ThresholdKind::Count => report.unverified_count() as f64 >= self.threshold_value,
            ThresholdKind::Rate => (report.success_rate as f64) < self.threshold_value,
            ThresholdKind::Duration => report.max_duration_seconds() > self.threshold_value,
        }
    }

    /// Expand `{success_rate}`, `{total}`, `{success}`, `{failed}`,
    /// `{timeout}`, `{missing}`, `{partial}`, `{unverified}` and `{threshold}`.
    pub fn render(&self, report: &AggregateReport) -> String {
        let threshold = if self.threshold_value.fract() == 0.0 {
            format!("{}", self.threshold_value as i64)
        } else {
            format!("{}", self.threshold_value)
        };
        [
            ("{success_rate}", report.success_rate.to_string()),
            ("{total}", report.total_jobs.to_string()),
            ("{success}", report.success_count.to_string()),
            ("{failed}", report.failed_count.to_string()),
            ("{timeout}", report.timeout_count.to_string()),
            ("{missing}", report.missing_count.to_string()),
            ("{partial}", report.partial_count.to_string()),
            ("{unverified}", report.unverified_count().to_string()),
            ("{threshold}", threshold),
        ]
        .iter()
        .fold(self.message.clone(), |text, (placeholder, value)| {
            text.replace(placeholder, value)
        })
    }
}

/// Built-in rules for a success-rate threshold.
pub fn default_rules(threshold: u64) -> Vec<AlertRule> {
    vec![
        AlertRule {
            alert_type: "low_success_rate".to_string(),
            threshold_kind: ThresholdKind::Rate,
            threshold_value: threshold as f64,
            severity: Severity::Critical,
            message: "Verification success rate {success_rate}% is below {threshold}% \
                      ({success}/{total} jobs verified)"
                .to_string(),
        },
        AlertRule {
            alert_type: "job_failures".to_string(),
            threshold_kind: ThresholdKind::Count,
            threshold_value: 1.0,
            severity: Severity::Warning,
            message: "{unverified} verification job(s) not verified: {failed} failed, \
                      {timeout} timed out, {missing} missing, {partial} partial"
                .to_string(),
        },
    ]
}

fn default_threshold() -> u64 {
    DEFAULT_THRESHOLD
}

fn default_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

/// Persisted alerting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,

    #[serde(default = "default_threshold")]
    pub threshold: u64,

    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }
}

impl AlertConfig {
    /// No channels, default cooldown, default rules for `threshold`.
    pub fn with_threshold(threshold: u64) -> Self {
        Self {
            email: None,
            webhook: None,
            threshold,
            cooldown_seconds: DEFAULT_COOLDOWN_SECS,
            rules: default_rules(threshold),
        }
    }

    pub async fn load(store: &dyn StateStore) -> Result<Option<Self>> {
        Ok(load(store, CONFIG_KEY).await?)
    }

    pub async fn save(&self, store: &dyn StateStore) -> Result<()> {
        Ok(save(store, CONFIG_KEY, self).await?)
    }

    /// Instantiate the configured channels.
    pub fn channels(&self) -> Result<Vec<Arc<dyn NotificationChannel>>> {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        if let Some(email) = &self.email {
            channels.push(Arc::new(EmailChannel::new(email.clone())));
        }
        if let Some(webhook) = &self.webhook {
            channels.push(Arc::new(WebhookChannel::new(webhook.clone())?));
        }
        Ok(channels)
    }
}

/// Per-rule result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    NotTriggered { alert_type: String },
    Suppressed { alert_type: String, remaining_secs: i64 },
    Dispatched { alert_type: String, delivered: usize, failed: usize },
}

impl AlertOutcome {
    pub fn alert_type(&self) -> &str {
        match self {
            AlertOutcome::NotTriggered { alert_type }
            | AlertOutcome::Suppressed { alert_type, .. }
            | AlertOutcome::Dispatched { alert_type, .. } => alert_type,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, AlertOutcome::Dispatched { .. })
    }
}

/// Delivery tally for one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

pub struct AlertEngine {
    store: Arc<dyn StateStore>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    rules: Vec<AlertRule>,
    cooldown: Duration,
    claim_lock: Mutex<()>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        rules: Vec<AlertRule>,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            channels,
            rules,
            cooldown,
            claim_lock: Mutex::new(()),
        }
    }

    /// Engine wired to the channels and rules in `config`.
    pub fn from_config(store: Arc<dyn StateStore>, config: &AlertConfig) -> Result<Self> {
        Ok(Self::new(
            store,
            config.channels()?,
            config.rules.clone(),
            Duration::from_secs(config.cooldown_seconds),
        ))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn evaluate(&self, report: &AggregateReport) -> Result<Vec<AlertOutcome>> {
        self.evaluate_at(report, Utc::now()).await
    }

    /// Evaluate every rule as of `now`.
    pub async fn evaluate_at(
        &self,
        report: &AggregateReport,
        now: DateTime<Utc>,
    ) -> Result<Vec<AlertOutcome>> {
        let mut outcomes = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            if !rule.holds(report) {
                outcomes.push(AlertOutcome::NotTriggered {
                    alert_type: rule.alert_type.clone(),
                });
                continue;
            }

            if let Some(remaining_secs) = self.claim(&rule.alert_type, now).await? {
                obs::emit_alert_suppressed(&rule.alert_type, remaining_secs);
                outcomes.push(AlertOutcome::Suppressed {
                    alert_type: rule.alert_type.clone(),
                    remaining_secs,
                });
                continue;
            }

            let subject = format!("{} ({})", rule.alert_type, rule.severity);
            let delivery = self.fan_out(&subject, &rule.render(report), rule.severity).await;
            obs::emit_alert_dispatched(&rule.alert_type, rule.severity.as_str(), delivery.delivered);
            outcomes.push(AlertOutcome::Dispatched {
                alert_type: rule.alert_type.clone(),
                delivered: delivery.delivered,
                failed: delivery.failed,
            });
        }
        Ok(outcomes)
    }

    /// Claim a dispatch slot for `alert_type`.
    ///
    /// Returns `Some(remaining)` while cooling; otherwise records `now` and
    /// returns `None`.
    async fn claim(&self, alert_type: &str, now: DateTime<Utc>) -> Result<Option<i64>> {
        let _guard = self.claim_lock.lock().await;
        let mut state = CooldownState::load(self.store.as_ref()).await?;
        let cooldown = i64::try_from(self.cooldown.as_secs()).unwrap_or(i64::MAX);
        if let Some(remaining) = state.remaining(alert_type, now.timestamp(), cooldown) {
            return Ok(Some(remaining));
        }
        state.record(alert_type, now.timestamp());
        state.save(self.store.as_ref()).await?;
        Ok(None)
    }

    /// One test message per channel. Rules and cooldowns are untouched.
    pub async fn send_test(&self) -> Delivery {
        info!(channels = self.channels.len(), "sending test alert");
        self.fan_out(
            "test alert",
            "This is a test notification from vbatch. Alert delivery is configured correctly.",
            Severity::Info,
        )
        .await
    }

    async fn fan_out(&self, subject: &str, body: &str, severity: Severity) -> Delivery {
        let sends = self
            .channels
            .iter()
            .map(|channel| async move { (channel.name().to_string(), channel.send(subject, body, severity).await) });
        let mut delivery = Delivery::default();
        for (name, outcome) in futures::future::join_all(sends).await {
            match outcome {
                Ok(()) => {
                    METRICS.inc_alerts_sent();
                    delivery.delivered += 1;
                }
                Err(e) => {
                    obs::emit_channel_error(&name, &e);
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::domain::{JobDescriptor, JobKind, JobResult, JobStatus};
    use crate::fakes::RecordingChannel;
    use vbatch_state::fakes::MemoryStateStore;

    fn report(statuses: &[JobStatus]) -> AggregateReport {
        let now = Utc::now();
        aggregate(statuses.iter().enumerate().map(|(i, status)| {
            let d = JobDescriptor::new(format!("job-{i}"), JobKind::NativeTest, "t", "t.rs");
            JobResult::new(&d, *status, 1, 1, now, now)
        }))
    }

    #[test]
    fn test_rule_conditions() {
        let mixed = report(&[JobStatus::Success, JobStatus::Failed, JobStatus::Partial]);
        let rules = default_rules(80);
        assert!(rules[0].holds(&mixed));
        assert!(rules[1].holds(&mixed));

        let clean = report(&[JobStatus::Success]);
        assert!(!rules[0].holds(&clean));
        assert!(!rules[1].holds(&clean));
    }

    #[test]
    fn test_rate_rule_is_strict() {
        let rule = &default_rules(50)[0];
        let half = report(&[JobStatus::Success, JobStatus::Failed]);
        assert_eq!(half.success_rate, 50);
        assert!(!rule.holds(&half));
    }

    #[test]
    fn test_render_placeholders() {
        let r = report(&[JobStatus::Success, JobStatus::Timeout, JobStatus::Missing]);
        let text = default_rules(90)[0].render(&r);
        assert_eq!(
            text,
            "Verification success rate 33% is below 90% (1/3 jobs verified)"
        );
        let text = default_rules(90)[1].render(&r);
        assert!(text.starts_with("2 verification job(s)"));
        assert!(text.contains("1 timed out, 1 missing"));
    }

    #[test]
    fn test_config_defaults() {
        let config: AlertConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.cooldown_seconds, DEFAULT_COOLDOWN_SECS);
        assert!(config.rules.is_empty());
        assert_eq!(AlertConfig::default().rules.len(), 2);
    }

    #[tokio::test]
    async fn test_second_evaluation_within_cooldown_is_suppressed() {
        let store = Arc::new(MemoryStateStore::new());
        let channel = Arc::new(RecordingChannel::new("chat"));
        let engine = AlertEngine::new(
            store,
            vec![channel.clone()],
            default_rules(80),
            Duration::from_secs(3600),
        );
        let failing = report(&[JobStatus::Failed]);
        let t0 = Utc::now();

        let first = engine.evaluate_at(&failing, t0).await.unwrap();
        assert!(first.iter().all(AlertOutcome::is_dispatched));
        assert_eq!(channel.sent().len(), 2);

        let second = engine
            .evaluate_at(&failing, t0 + chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert!(second
            .iter()
            .all(|o| matches!(o, AlertOutcome::Suppressed { remaining_secs: 3540, .. })));
        assert_eq!(channel.sent().len(), 2);
    }
}
