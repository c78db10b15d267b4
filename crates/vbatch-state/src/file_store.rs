use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::store::{validate_key, StateStore, StorageResult};

const EXTENSION: &str = "json";

/// Filesystem-backed state store.
///
/// Layout: `<root>/<key>.json`, so `reports/latest` lives at
/// `<root>/reports/latest.json` where report renderers and the status poller
/// can read it directly.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{EXTENSION}"))
    }

    fn read(path: &Path) -> StorageResult<Option<serde_json::Value>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn write(path: &Path, value: &serde_json::Value) -> StorageResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey {
                key: path.display().to_string(),
            })?;
        fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

        // Atomic write: temp file in the same directory, then rename.
        let content = serde_json::to_vec_pretty(value)?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
        tmp.write_all(&content)
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StorageError::io(path, e.error))?;
        Ok(())
    }

    fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> StorageResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_keys(root, &path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Ok(relative) = path.with_extension("").strip_prefix(root).map(Path::to_path_buf)
            else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if validate_key(&key).is_ok() {
                out.push(key);
            }
        }
        Ok(())
    }
}

async fn blocking<T, F>(path: PathBuf, f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::io(path, std::io::Error::other(e.to_string())))?
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        validate_key(key)?;
        let path = self.path_for(key);
        blocking(path.clone(), move || Self::read(&path)).await
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        debug!(key = %key, path = %path.display(), "writing state document");
        blocking(path.clone(), move || Self::write(&path, &value)).await
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.trim_end_matches('/').to_string();
        let start = if prefix.is_empty() {
            root.clone()
        } else {
            validate_key(&prefix)?;
            root.join(&prefix)
        };
        let mut keys = blocking(start.clone(), move || {
            let mut out = Vec::new();
            Self::collect_keys(&root, &start, &mut out)?;
            Ok(out)
        })
        .await?;
        if !prefix.is_empty() && self.path_for(&prefix).is_file() {
            keys.push(prefix);
        }
        keys.sort();
        Ok(keys)
    }
}
