use crate::error::AgentError;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// File-backed key-value store standing in for the host profile storage:
/// one JSON document per well-known key under the storage directory. The
/// owning process is routinely suspended and resumed, so everything that
/// must outlive it goes through here.
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AgentError::Storage(format!("cannot create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AgentError> {
        match fs::read_to_string(self.path(key)).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| AgentError::Storage(format!("corrupt record {}: {}", key, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Storage(e.to_string())),
        }
    }

    /// Writes via a temp file + rename so a crash never leaves a torn record.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AgentError> {
        let serialized =
            serde_json::to_vec_pretty(value).map_err(|e| AgentError::Storage(e.to_string()))?;
        let tmp = self.dir.join(format!("{}.tmp", key));
        fs::write(&tmp, &serialized)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        fs::rename(&tmp, self.path(key))
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        Ok(())
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}
