use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::audit::reconcile::IntegrityReport;
use crate::audit::status_scan::StatusReport;
use crate::persist::{self, PersistError};
use crate::timefmt;
use crate::upload::scheduler::RunSummary;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Serialize)]
pub struct UploadReportSummary {
    pub total_files: usize,
    pub successful_uploads: usize,
    pub failed_uploads: usize,
    pub skipped_files: usize,
    pub provisional_uploads: usize,
    pub interrupted: bool,
    pub average_upload_time: f64,
}

#[derive(Debug, Serialize)]
pub struct SuccessfulFile {
    pub file_path: String,
    pub file_size: u64,
    pub upload_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FailedFile {
    pub file_path: String,
    pub error: String,
    pub retry_count: u32,
}

/// Final report of one upload run.
#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub timestamp: String,
    pub knowledge_base_id: String,
    pub summary: UploadReportSummary,
    pub successful_files: Vec<SuccessfulFile>,
    pub failed_files: Vec<FailedFile>,
    pub pending_files: Vec<String>,
}

impl UploadReport {
    pub fn from_summary(knowledge_base_id: &str, summary: &RunSummary) -> Self {
        Self {
            timestamp: timefmt::now_rfc3339(),
            knowledge_base_id: knowledge_base_id.to_string(),
            summary: UploadReportSummary {
                total_files: summary.total,
                successful_uploads: summary.successful,
                failed_uploads: summary.failed,
                skipped_files: summary.skipped,
                provisional_uploads: summary.provisional,
                interrupted: summary.interrupted,
                average_upload_time: summary.average_upload_time,
            },
            successful_files: summary
                .successes()
                .map(|task| SuccessfulFile {
                    file_path: task.path_key(),
                    file_size: task.file_size,
                    upload_time: task
                        .upload_duration
                        .map(|duration| duration.as_secs_f64())
                        .unwrap_or_default(),
                    file_id: task.remote_file_id.clone(),
                    note: task.note.clone(),
                })
                .collect(),
            failed_files: summary
                .failures()
                .map(|task| FailedFile {
                    file_path: task.path_key(),
                    error: task.error_message.clone().unwrap_or_default(),
                    retry_count: task.retry_count,
                })
                .collect(),
            pending_files: summary.pending.clone(),
        }
    }
}

/// Writes timestamped JSON artifacts into one reports directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write_upload_report(&self, report: &UploadReport) -> Result<PathBuf, ReportError> {
        self.write("upload_report", report).await
    }

    pub async fn write_integrity_report(
        &self,
        report: &IntegrityReport,
    ) -> Result<PathBuf, ReportError> {
        self.write("integrity_check", report).await
    }

    pub async fn write_status_report(&self, report: &StatusReport) -> Result<PathBuf, ReportError> {
        self.write("status_scan", report).await
    }

    /// `<kind>_log_<stamp>.json`, for cleanup operations.
    pub async fn write_operation_log<T: Serialize>(
        &self,
        kind: &str,
        log: &T,
    ) -> Result<PathBuf, ReportError> {
        self.write(&format!("{kind}_log"), log).await
    }

    async fn write<T: Serialize>(&self, prefix: &str, value: &T) -> Result<PathBuf, ReportError> {
        self.write_at(prefix, value, OffsetDateTime::now_utc()).await
    }

    pub async fn write_at<T: Serialize>(
        &self,
        prefix: &str,
        value: &T,
        at: OffsetDateTime,
    ) -> Result<PathBuf, ReportError> {
        let path = self
            .dir
            .join(format!("{prefix}_{}.json", timefmt::file_stamp(at)));
        persist::write_json_atomic(&path, value).await?;
        info!(path = %path.display(), "report saved");
        Ok(path)
    }
}

/// Reads a report written by an earlier command.
pub async fn load_report<T: DeserializeOwned>(path: &Path) -> Result<T, ReportError> {
    persist::read_json(path)
        .await?
        .ok_or_else(|| ReportError::NotFound(path.to_path_buf()))
}
