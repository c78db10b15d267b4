//! Persisted per-alert-type cooldown timestamps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vbatch_state::{load, save, StateStore};

use crate::error::Result;

pub const COOLDOWN_KEY: &str = "alerts/cooldowns";

/// `alert_type -> last_sent` in epoch seconds. Entries only move forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    #[serde(default)]
    pub last_sent: BTreeMap<String, i64>,
}

impl CooldownState {
    pub async fn load(store: &dyn StateStore) -> Result<Self> {
        Ok(load(store, COOLDOWN_KEY).await?.unwrap_or_default())
    }

    pub async fn save(&self, store: &dyn StateStore) -> Result<()> {
        Ok(save(store, COOLDOWN_KEY, self).await?)
    }

    pub fn last_sent(&self, alert_type: &str) -> Option<i64> {
        self.last_sent.get(alert_type).copied()
    }

    /// Seconds left before `alert_type` may fire again; `None` when idle.
    pub fn remaining(&self, alert_type: &str, now: i64, cooldown_secs: i64) -> Option<i64> {
        let last = self.last_sent(alert_type)?;
        let elapsed = now - last;
        (elapsed < cooldown_secs).then(|| cooldown_secs - elapsed)
    }

    pub fn record(&mut self, alert_type: &str, now: i64) {
        let entry = self.last_sent.entry(alert_type.to_string()).or_insert(now);
        *entry = (*entry).max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vbatch_state::fakes::MemoryStateStore;

    #[test]
    fn test_remaining() {
        let mut state = CooldownState::default();
        assert_eq!(state.remaining("job_failures", 1_000, 3600), None);
        state.record("job_failures", 1_000);
        assert_eq!(state.remaining("job_failures", 1_600, 3600), Some(3000));
        assert_eq!(state.remaining("job_failures", 4_600, 3600), None);
        assert_eq!(state.remaining("low_success_rate", 1_600, 3600), None);
    }

    #[test]
    fn test_record_is_monotonic() {
        let mut state = CooldownState::default();
        state.record("a", 500);
        state.record("a", 200);
        assert_eq!(state.last_sent("a"), Some(500));
        state.record("a", 900);
        assert_eq!(state.last_sent("a"), Some(900));
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let store = MemoryStateStore::new();
        assert_eq!(CooldownState::load(&store).await.unwrap(), CooldownState::default());

        let mut state = CooldownState::default();
        state.record("job_failures", 42);
        state.save(&store).await.unwrap();
        assert_eq!(CooldownState::load(&store).await.unwrap(), state);
    }
}
