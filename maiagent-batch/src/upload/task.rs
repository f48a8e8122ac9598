use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Failed,
    Skipped,
}

/// One local file moving through the upload protocol.
///
/// Only the worker that claimed the task mutates it; shared state flows through the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub status: UploadStatus,
    pub error_message: Option<String>,
    pub upload_duration: Option<Duration>,
    pub retry_count: u32,
    pub remote_file_id: Option<String>,
    pub note: Option<String>,
}

impl UploadTask {
    pub fn new(file_path: impl Into<PathBuf>, file_size: u64) -> Self {
        Self {
            file_path: file_path.into(),
            file_size,
            status: UploadStatus::Pending,
            error_message: None,
            upload_duration: None,
            retry_count: 0,
            remote_file_id: None,
            note: None,
        }
    }

    /// Checkpoint key for this task.
    pub fn path_key(&self) -> String {
        path_key(&self.file_path)
    }

    pub fn filename(&self) -> String {
        filename_of(&self.file_path)
    }

    /// Success whose remote id is unknown because registration answered ambiguously.
    pub fn is_provisional(&self) -> bool {
        self.status == UploadStatus::Success && self.remote_file_id.is_none()
    }
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
