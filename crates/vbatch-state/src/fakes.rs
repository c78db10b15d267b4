//! In-memory fake for the storage trait (testing only)
//!
//! `MemoryStateStore` satisfies the `StateStore` contract without touching
//! the filesystem.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::{validate_key, StateStore, StorageResult};

/// In-memory state store backed by a `BTreeMap<key, value>`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        validate_key(key)?;
        let values = self.values.lock().unwrap();
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> StorageResult<()> {
        validate_key(key)?;
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let values = self.values.lock().unwrap();
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(values
            .keys()
            .filter(|k| prefix.is_empty() || k.as_str() == prefix || k.starts_with(&dir))
            .cloned()
            .collect())
    }
}
