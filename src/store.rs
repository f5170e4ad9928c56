use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};

use crate::debounce::DebounceState;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write state to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The persisted blob: the debounce fields plus cycle bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(flatten)]
    pub state: DebounceState,
    /// Set when a confirmed change could not be announced.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub notify_failed: bool,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Never fails: a missing or unreadable record yields the default state.
    async fn load(&self) -> StateRecord;

    async fn save(&self, record: &StateRecord) -> Result<(), StoreError>;
}

/// Keeps the single state record in a JSON file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: io::Error) -> StoreError {
        StoreError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> StateRecord {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No state at {}, starting fresh", self.path.display());
                return StateRecord::default();
            }
            Err(err) => {
                warn!("Error reading state from {}: {err}", self.path.display());
                return StateRecord::default();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!("Error parsing state in {}: {err}", self.path.display());
            StateRecord::default()
        })
    }

    async fn save(&self, record: &StateRecord) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.write_error(e))?;
        }

        // Write beside the target and rename so a crash never leaves a torn file.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| self.write_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.write_error(e))?;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}
