//! Versioned persistence of aggregate reports.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use vbatch_state::{load, save, StateStore};

use crate::domain::AggregateReport;
use crate::error::Result;
use crate::obs;

/// Pointer document to the most recent report.
pub const LATEST_KEY: &str = "reports/latest";

/// Prefix under which every snapshot is kept.
pub const HISTORY_PREFIX: &str = "reports/history";

/// Writes each report as a new snapshot and moves the `latest` pointer.
#[derive(Clone)]
pub struct ReportWriter {
    store: Arc<dyn StateStore>,
}

impl ReportWriter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Persist `report`; returns the snapshot key.
    ///
    /// The snapshot goes first so `latest` never points at a report that
    /// is missing from history.
    pub async fn persist(&self, report: &AggregateReport) -> Result<String> {
        let short_id = Uuid::new_v4().simple().to_string();
        let version = format!(
            "{HISTORY_PREFIX}/{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            &short_id[..8]
        );
        save(self.store.as_ref(), &version, report).await?;
        save(self.store.as_ref(), LATEST_KEY, report).await?;
        obs::emit_report_persisted(&version);
        Ok(version)
    }

    pub async fn latest(&self) -> Result<Option<AggregateReport>> {
        Ok(load(self.store.as_ref(), LATEST_KEY).await?)
    }

    /// Snapshot keys, oldest first.
    pub async fn history(&self) -> Result<Vec<String>> {
        Ok(self.store.keys(HISTORY_PREFIX).await?)
    }

    pub async fn snapshot(&self, version: &str) -> Result<Option<AggregateReport>> {
        Ok(load(self.store.as_ref(), version).await?)
    }
}
