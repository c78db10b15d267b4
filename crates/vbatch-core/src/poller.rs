//! Status poller: merges the latest reports of several producers.
//!
//! Each source is a JSON document carrying an RFC 3339 `timestamp` and
//! top-level numeric fields, usually a `reports/latest.json` written by
//! [`crate::ReportWriter`]. The merged view keeps the last known good value
//! per metric; a source that disappears, goes stale or stops parsing never
//! erases what was already observed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, VbatchError};
use crate::metrics::METRICS;
use crate::obs;

/// One polled report document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub name: String,
    pub path: PathBuf,
}

impl ReportLocation {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl std::str::FromStr for ReportLocation {
    type Err = String;

    /// Parses `NAME=PATH`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                Ok(Self::new(name, path))
            }
            _ => Err(format!("expected NAME=PATH, got {s:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MetricValue {
    Known {
        value: f64,
        source: String,
        timestamp: DateTime<Utc>,
    },
    Unknown,
}

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Known { value, .. } => Some(*value),
            MetricValue::Unknown => None,
        }
    }
}

/// Read-only merged view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedStatus {
    pub polled_at: Option<DateTime<Utc>>,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl MergedStatus {
    /// Value of `metric`, `Unknown` if never observed.
    pub fn metric(&self, metric: &str) -> MetricValue {
        self.metrics
            .get(metric)
            .cloned()
            .unwrap_or(MetricValue::Unknown)
    }

    fn offer(&mut self, metric: &str, value: f64, source: &str, timestamp: DateTime<Utc>) {
        let replace = match self.metrics.get(metric) {
            Some(MetricValue::Known {
                timestamp: current_ts,
                source: current_source,
                ..
            }) => (timestamp, source) >= (*current_ts, current_source.as_str()),
            Some(MetricValue::Unknown) | None => true,
        };
        if replace {
            self.metrics.insert(
                metric.to_string(),
                MetricValue::Known {
                    value,
                    source: source.to_string(),
                    timestamp,
                },
            );
        }
    }
}

/// Timestamp and numeric fields of one source document.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

/// Parse a report document.
pub fn parse_source(name: &str, raw: &str) -> Result<SourceReading> {
    let invalid = |reason: String| VbatchError::Source {
        source_name: name.to_string(),
        reason,
    };
    let document: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
    let object = document
        .as_object()
        .ok_or_else(|| invalid("document is not a JSON object".to_string()))?;
    let timestamp = object
        .get("timestamp")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("missing timestamp".to_string()))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| invalid(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);

    let values = object
        .iter()
        .filter(|(key, _)| key.as_str() != "timestamp")
        .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
        .collect();
    Ok(SourceReading { timestamp, values })
}

pub struct StatusPoller {
    sources: Vec<ReportLocation>,
    max_age: Option<Duration>,
    snapshot: Arc<RwLock<MergedStatus>>,
}

impl StatusPoller {
    pub fn new(sources: Vec<ReportLocation>) -> Self {
        Self {
            sources,
            max_age: None,
            snapshot: Arc::new(RwLock::new(MergedStatus::default())),
        }
    }

    /// Ignore sources whose timestamp is older than `max_age`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Pre-register metrics so they show as `Unknown` until observed.
    pub fn with_metrics(self, metrics: &[&str]) -> Self {
        if let Ok(mut snapshot) = self.snapshot.try_write() {
            for metric in metrics {
                snapshot
                    .metrics
                    .entry((*metric).to_string())
                    .or_insert(MetricValue::Unknown);
            }
        }
        self
    }

    pub async fn snapshot(&self) -> MergedStatus {
        self.snapshot.read().await.clone()
    }

    pub async fn poll(&self) -> MergedStatus {
        self.poll_at(Utc::now()).await
    }

    /// One pass over every source as of `now`.
    pub async fn poll_at(&self, now: DateTime<Utc>) -> MergedStatus {
        let mut readings = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match self.read(source).await {
                Ok(reading) if self.is_stale(&reading, now) => {
                    debug!(source = %source.name, timestamp = %reading.timestamp, "source is stale");
                }
                Ok(reading) => readings.push((source.name.as_str(), reading)),
                Err(e) => {
                    METRICS.inc_polls_failed();
                    obs::emit_poll_error(&source.name, &e);
                }
            }
        }

        let mut snapshot = self.snapshot.write().await;
        for (name, reading) in readings {
            for (metric, value) in &reading.values {
                snapshot.offer(metric, *value, name, reading.timestamp);
            }
        }
        snapshot.polled_at = Some(now);
        snapshot.clone()
    }

    fn is_stale(&self, reading: &SourceReading, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        match (now - reading.timestamp).to_std() {
            Ok(age) => age > max_age,
            // Timestamps in the future are not stale.
            Err(_) => false,
        }
    }

    async fn read(&self, source: &ReportLocation) -> Result<SourceReading> {
        let raw = tokio::fs::read_to_string(&source.path)
            .await
            .map_err(|e| VbatchError::Source {
                source_name: source.name.clone(),
                reason: format!("{}: {e}", source.path.display()),
            })?;
        parse_source(&source.name, &raw)
    }

    /// Poll every `interval` until `cancel` fires, handing each merged view
    /// to `on_update`.
    pub async fn run<F>(&self, interval: Duration, cancel: CancellationToken, mut on_update: F)
    where
        F: FnMut(&MergedStatus) + Send,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let status = self.poll().await;
            on_update(&status);
        }
        debug!("status poller stopped");
    }
}
