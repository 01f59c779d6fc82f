//! Local storage for the session
//!
//! A string key/value map standing in for the browser's local storage. It is
//! either memory-only or backed by a JSON file. File writes use temp-file +
//! rename so a crash mid-write never leaves a torn file, and a tokio Mutex
//! serializes concurrent writers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub struct LocalStore {
    path: Option<PathBuf>,
    state: Mutex<HashMap<String, String>>,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Load entries from `path`, creating the file as `{}` if it is missing.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), entries = entries.len(), "loaded local storage");
            entries
        } else {
            info!(path = %path.display(), "local storage file not found, starting empty");
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.state.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(key.to_string(), value);
        debug!(key, "stored local entry");
        self.persist(&state).await
    }

    /// Remove `key`. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.remove(key).is_some();
        if removed {
            debug!(key, "removed local entry");
            self.persist(&state).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, state: &HashMap<String, String>) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, state).await,
            None => Ok(()),
        }
    }
}

/// Write entries to a file atomically, owner read/write only on unix since
/// the file holds personal data.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing local storage: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("storage path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".local-storage.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp storage file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting storage file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp storage file: {e}")))?;

    debug!(path = %path.display(), "persisted local storage");
    Ok(())
}
