use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::persist::{self, PersistError};
use crate::timefmt;

pub const CHECKPOINT_FILE_NAME: &str = "upload_checkpoint.json";
const PROGRESS_LOG_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("checkpoint persistence failed: {0}")]
    Persist(#[from] PersistError),
}

/// Durable progress of a batch run.
///
/// `failed_files` entries serialize as `[path, error]` pairs. `provisional_files`
/// holds completed paths whose registration answered ambiguously and therefore
/// have no id in `file_id_mapping` yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub completed_files: BTreeSet<String>,
    #[serde(default)]
    pub file_id_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub failed_files: Vec<(String, String)>,
    #[serde(default)]
    pub pending_files: Vec<String>,
    #[serde(default)]
    pub provisional_files: BTreeSet<String>,
}

/// Changes produced since the last save; merged into whatever is on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointDelta {
    pub completed: Vec<String>,
    pub file_ids: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    pub provisional: Vec<String>,
    /// Replaces the stored pending list when present.
    pub pending: Option<Vec<String>>,
}

impl CheckpointDelta {
    pub fn completed(path: impl Into<String>, file_id: Option<String>) -> Self {
        let path = path.into();
        let mut delta = Self {
            completed: vec![path.clone()],
            ..Self::default()
        };
        match file_id {
            Some(id) => delta.file_ids.push((path, id)),
            None => delta.provisional.push(path),
        }
        delta
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            failed: vec![(path.into(), error.into())],
            ..Self::default()
        }
    }

    pub fn pending(paths: Vec<String>) -> Self {
        Self {
            pending: Some(paths),
            ..Self::default()
        }
    }
}

impl CheckpointRecord {
    pub fn is_completed(&self, path: &str) -> bool {
        self.completed_files.contains(path)
    }

    /// Set-union for completions, last-write-wins for ids, one failure per path.
    ///
    /// A path that is completed never keeps a failure entry and never stays pending.
    pub fn merge(&mut self, delta: CheckpointDelta) {
        self.completed_files.extend(delta.completed);

        for (path, id) in delta.file_ids {
            self.provisional_files.remove(&path);
            self.file_id_mapping.insert(path, id);
        }
        for path in delta.provisional {
            if !self.file_id_mapping.contains_key(&path) {
                self.provisional_files.insert(path);
            }
        }

        for (path, error) in delta.failed {
            match self.failed_files.iter_mut().find(|(failed, _)| *failed == path) {
                Some(existing) => existing.1 = error,
                None => self.failed_files.push((path, error)),
            }
        }
        let completed = &self.completed_files;
        self.failed_files.retain(|(path, _)| !completed.contains(path));

        if let Some(pending) = delta.pending {
            self.pending_files = pending;
        }
        self.pending_files.retain(|path| !completed.contains(path));
    }
}

/// Single owner of the checkpoint file; every save is a locked read-merge-write.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CHECKPOINT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<CheckpointRecord, CheckpointError> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    /// Absence means a fresh run.
    pub async fn load_or_default(&self) -> Result<CheckpointRecord, CheckpointError> {
        match self.load().await {
            Ok(record) => Ok(record),
            Err(CheckpointError::NotFound(_)) => Ok(CheckpointRecord::default()),
            Err(err) => Err(err),
        }
    }

    pub async fn save(&self, delta: CheckpointDelta) -> Result<CheckpointRecord, CheckpointError> {
        let _guard = self.lock.lock().await;
        let mut record = match self.read_unlocked().await {
            Ok(record) => record,
            Err(CheckpointError::NotFound(_)) => CheckpointRecord::default(),
            Err(err) => return Err(err),
        };
        let before = record.completed_files.len();
        record.merge(delta);
        record.timestamp = timefmt::now_rfc3339();
        persist::write_json_atomic(&self.path, &record).await?;

        let after = record.completed_files.len();
        if after / PROGRESS_LOG_EVERY > before / PROGRESS_LOG_EVERY {
            info!(completed = after, "checkpoint saved");
        } else {
            debug!(completed = after, path = %self.path.display(), "checkpoint saved");
        }
        Ok(record)
    }

    async fn read_unlocked(&self) -> Result<CheckpointRecord, CheckpointError> {
        persist::read_json(&self.path)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(self.path.clone()))
    }
}
