//! Storage trait definition for vbatch
//!
//! `StateStore` is the only way vbatch persists shared state:
//! - alert cooldowns (`alerts/cooldowns`)
//! - alert configuration (`alerts/config`)
//! - aggregate report snapshots (`reports/latest`, `reports/history/<version>`)
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Key/value document store.
///
/// Guarantees:
/// - `set(key, v)` followed by `get(key)` returns `v` (read-after-write).
/// - A reader never observes a partially written value.
/// - `keys(prefix)` returns every stored key under `prefix`, sorted.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: serde_json::Value) -> StorageResult<()>;

    /// List keys starting with `prefix` (segment-aware), sorted ascending.
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Validate a state key.
///
/// Keys are `/`-separated segments of ASCII alphanumerics, `-`, `_` and `.`;
/// empty segments and `.`/`..` are rejected so keys always map inside the
/// store root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidKey {
        key: key.to_string(),
    };
    if key.is_empty() {
        return Err(invalid());
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid());
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Load and deserialize the document under `key`.
pub async fn load<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Deserialization {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Serialize `value` and store it under `key`.
pub async fn save<T: Serialize + Sync>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, value).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("alerts/cooldowns").is_ok());
        assert!(validate_key("reports/history/20260101T000000Z-ab12cd34").is_ok());
        assert!(validate_key("latest").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a/b c").is_err());
        assert!(validate_key("trailing/").is_err());
    }
}
