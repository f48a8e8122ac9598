use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use super::reconcile::{ExtraFile, MissingFile};
use super::status_scan::ScannedFile;
use crate::timefmt;
use crate::upload::gateway::{GatewayError, RemoteGateway};
use crate::upload::scheduler::RunSummary;
use crate::upload::task::UploadTask;

/// Deletion answered 500 but the file is usually gone anyway.
const ASSUMED_DELETED_STATUS: u16 = 500;
const BUSY_STATUS: u16 = 409;

/// Pause between deletions, drawn uniformly from `min..=max`.
#[derive(Debug, Clone, Copy)]
pub struct DeletePacing {
    min: Duration,
    max: Duration,
}

impl DeletePacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn next_pause(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for DeletePacing {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(500))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionTarget {
    pub knowledge_file_id: String,
    pub filename: String,
}

impl From<&ExtraFile> for DeletionTarget {
    fn from(file: &ExtraFile) -> Self {
        Self {
            knowledge_file_id: file.knowledge_file_id.clone(),
            filename: file.filename.clone(),
        }
    }
}

impl From<&ScannedFile> for DeletionTarget {
    fn from(file: &ScannedFile) -> Self {
        Self {
            knowledge_file_id: file.id.clone(),
            filename: file.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedFile {
    pub knowledge_file_id: String,
    pub filename: String,
    /// The API answered 500; deletion is presumed.
    pub assumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub knowledge_file_id: String,
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub deleted_files: Vec<DeletedFile>,
    pub failed_deletions: Vec<FailedDeletion>,
}

/// Deletes `targets` one at a time, pausing between calls.
pub async fn delete_files<G>(
    gateway: &G,
    targets: &[DeletionTarget],
    pacing: DeletePacing,
) -> DeletionOutcome
where
    G: RemoteGateway + ?Sized,
{
    let mut outcome = DeletionOutcome::default();
    for (index, target) in targets.iter().enumerate() {
        if index > 0 {
            let pause = pacing.next_pause();
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        match gateway.delete_file(&target.knowledge_file_id).await {
            Ok(()) => {
                info!(file = %target.filename, id = %target.knowledge_file_id, "deleted");
                outcome.deleted_files.push(deleted(target, false));
            }
            Err(GatewayError::DeletionFailed { status, .. }) if status == ASSUMED_DELETED_STATUS => {
                warn!(file = %target.filename, "deletion answered 500; assuming it succeeded");
                outcome.deleted_files.push(deleted(target, true));
            }
            Err(GatewayError::DeletionFailed { status, .. }) if status == BUSY_STATUS => {
                warn!(file = %target.filename, "file is being processed; skipped");
                outcome
                    .failed_deletions
                    .push(failed(target, "File is being processed".to_string()));
            }
            Err(err) => {
                warn!(file = %target.filename, error = %err, "deletion failed");
                outcome.failed_deletions.push(failed(target, err.to_string()));
            }
        }
        if (index + 1) % 10 == 0 {
            info!(done = index + 1, total = targets.len(), "deletion progress");
        }
    }
    info!(
        deleted = outcome.deleted_files.len(),
        failed = outcome.failed_deletions.len(),
        "deletion finished"
    );
    outcome
}

fn deleted(target: &DeletionTarget, assumed: bool) -> DeletedFile {
    DeletedFile {
        knowledge_file_id: target.knowledge_file_id.clone(),
        filename: target.filename.clone(),
        assumed,
    }
}

fn failed(target: &DeletionTarget, error: String) -> FailedDeletion {
    FailedDeletion {
        knowledge_file_id: target.knowledge_file_id.clone(),
        filename: target.filename.clone(),
        error,
    }
}

/// Local files found for a re-upload, plus the names that could not be found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFiles {
    pub found: Vec<PathBuf>,
    pub not_found: Vec<String>,
}

impl ResolvedFiles {
    pub fn into_tasks(self) -> Vec<UploadTask> {
        self.found
            .into_iter()
            .filter_map(|path| match std::fs::metadata(&path) {
                Ok(metadata) => Some(UploadTask::new(path, metadata.len())),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "file vanished before upload");
                    None
                }
            })
            .collect()
    }
}

/// Recorded path first, then `<files_dir>/<filename>`.
pub fn resolve_missing(missing: &[MissingFile], files_dir: Option<&Path>) -> ResolvedFiles {
    let mut resolved = ResolvedFiles::default();
    for file in missing {
        let recorded = Some(PathBuf::from(&file.filepath)).filter(|path| !file.filepath.is_empty());
        let candidates = recorded
            .into_iter()
            .chain(files_dir.map(|dir| dir.join(&file.filename)));
        push_first_existing(&mut resolved, candidates, &file.filename);
    }
    resolved
}

/// Looks each name up directly under `files_dir`.
pub fn resolve_by_name<'a>(
    filenames: impl IntoIterator<Item = &'a str>,
    files_dir: &Path,
) -> ResolvedFiles {
    let mut resolved = ResolvedFiles::default();
    for filename in filenames {
        push_first_existing(&mut resolved, [files_dir.join(filename)], filename);
    }
    resolved
}

fn push_first_existing(
    resolved: &mut ResolvedFiles,
    candidates: impl IntoIterator<Item = PathBuf>,
    filename: &str,
) {
    match candidates.into_iter().find(|path| path.is_file()) {
        Some(path) => {
            if !resolved.found.contains(&path) {
                resolved.found.push(path);
            }
        }
        None => resolved.not_found.push(filename.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct DeletionLog {
    pub timestamp: String,
    pub knowledge_base_id: String,
    pub integrity_report_used: String,
    pub total_files: usize,
    pub successful_deletions: usize,
    pub failed_deletions_count: usize,
    #[serde(flatten)]
    pub outcome: DeletionOutcome,
}

impl DeletionLog {
    pub fn new(
        knowledge_base_id: &str,
        report: &Path,
        total_files: usize,
        outcome: DeletionOutcome,
    ) -> Self {
        Self {
            timestamp: timefmt::now_rfc3339(),
            knowledge_base_id: knowledge_base_id.to_string(),
            integrity_report_used: report.display().to_string(),
            total_files,
            successful_deletions: outcome.deleted_files.len(),
            failed_deletions_count: outcome.failed_deletions.len(),
            outcome,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub file_path: String,
    pub file_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadFailure {
    pub file_path: String,
    pub error: String,
}

/// Per-file results of a follow-up upload.
#[derive(Debug, Default, Serialize)]
pub struct ReuploadResults {
    pub successful_uploads: Vec<UploadedFile>,
    pub failed_uploads: Vec<UploadFailure>,
    pub files_not_found: Vec<String>,
}

impl ReuploadResults {
    pub fn new(summary: &RunSummary, files_not_found: Vec<String>) -> Self {
        Self {
            successful_uploads: summary
                .successes()
                .map(|task| UploadedFile {
                    file_path: task.path_key(),
                    file_id: task.remote_file_id.clone(),
                })
                .collect(),
            failed_uploads: summary
                .failures()
                .map(|task| UploadFailure {
                    file_path: task.path_key(),
                    error: task.error_message.clone().unwrap_or_default(),
                })
                .collect(),
            files_not_found,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MissingUploadLog {
    pub timestamp: String,
    pub knowledge_base_id: String,
    pub files_directory: Option<String>,
    pub integrity_report_used: String,
    pub total_files: usize,
    pub successful_uploads_count: usize,
    pub failed_uploads_count: usize,
    #[serde(flatten)]
    pub results: ReuploadResults,
}

impl MissingUploadLog {
    pub fn new(
        knowledge_base_id: &str,
        files_dir: Option<&Path>,
        report: &Path,
        results: ReuploadResults,
    ) -> Self {
        Self {
            timestamp: timefmt::now_rfc3339(),
            knowledge_base_id: knowledge_base_id.to_string(),
            files_directory: files_dir.map(|dir| dir.display().to_string()),
            integrity_report_used: report.display().to_string(),
            total_files: results.successful_uploads.len() + results.failed_uploads.len(),
            successful_uploads_count: results.successful_uploads.len(),
            failed_uploads_count: results.failed_uploads.len(),
            results,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FixFailedSummary {
    pub deleted_files: usize,
    pub failed_deletions: usize,
    pub successful_uploads: usize,
    pub failed_uploads: usize,
}

#[derive(Debug, Serialize)]
pub struct FixFailedLog {
    pub timestamp: String,
    pub knowledge_base_id: String,
    pub files_directory: String,
    pub status_report_used: String,
    pub summary: FixFailedSummary,
    #[serde(flatten)]
    pub deletions: DeletionOutcome,
    #[serde(flatten)]
    pub uploads: ReuploadResults,
}

impl FixFailedLog {
    pub fn new(
        knowledge_base_id: &str,
        files_dir: &Path,
        report: &Path,
        deletions: DeletionOutcome,
        uploads: ReuploadResults,
    ) -> Self {
        Self {
            timestamp: timefmt::now_rfc3339(),
            knowledge_base_id: knowledge_base_id.to_string(),
            files_directory: files_dir.display().to_string(),
            status_report_used: report.display().to_string(),
            summary: FixFailedSummary {
                deleted_files: deletions.deleted_files.len(),
                failed_deletions: deletions.failed_deletions.len(),
                successful_uploads: uploads.successful_uploads.len(),
                failed_uploads: uploads.failed_uploads.len(),
            },
            deletions,
            uploads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryGateway, record};
    use maiagent_core::FileStatus;
    use tempfile::tempdir;

    fn target(id: &str) -> DeletionTarget {
        DeletionTarget {
            knowledge_file_id: id.to_string(),
            filename: format!("{id}.txt"),
        }
    }

    #[tokio::test]
    async fn server_error_counts_as_deleted_and_conflict_as_skipped() {
        let gateway = MemoryGateway::new().with_remote(vec![
            record("A", "A.txt", FileStatus::Done),
            record("B", "B.txt", FileStatus::Done),
            record("C", "C.txt", FileStatus::Processing),
            record("D", "D.txt", FileStatus::Done),
        ]);
        gateway.fail_deletion(
            "B",
            GatewayError::DeletionFailed {
                status: 500,
                body: "Internal Server Error".into(),
            },
        );
        gateway.fail_deletion(
            "C",
            GatewayError::DeletionFailed {
                status: 409,
                body: "Conflict".into(),
            },
        );
        gateway.fail_deletion(
            "D",
            GatewayError::DeletionFailed {
                status: 403,
                body: "Forbidden".into(),
            },
        );

        let outcome = delete_files(
            &gateway,
            &[target("A"), target("B"), target("C"), target("D")],
            DeletePacing::none(),
        )
        .await;

        assert_eq!(
            outcome.deleted_files,
            vec![deleted(&target("A"), false), deleted(&target("B"), true)]
        );
        assert_eq!(outcome.failed_deletions.len(), 2);
        assert_eq!(outcome.failed_deletions[0].knowledge_file_id, "C");
        assert_eq!(outcome.failed_deletions[0].error, "File is being processed");
        assert_eq!(
            outcome.failed_deletions[1].error,
            "deletion failed: 403 - Forbidden"
        );
        assert_eq!(gateway.deleted(), vec!["A"]);
    }

    #[test]
    fn missing_files_resolve_by_recorded_path_then_directory() {
        let recorded = tempdir().unwrap();
        let files_dir = tempdir().unwrap();
        std::fs::write(recorded.path().join("a.txt"), b"a").unwrap();
        std::fs::write(files_dir.path().join("b.txt"), b"b").unwrap();
        let missing = vec![
            MissingFile {
                filename: "a.txt".into(),
                filepath: recorded.path().join("a.txt").to_string_lossy().into_owned(),
                knowledge_file_id: Some("A".into()),
            },
            MissingFile {
                filename: "b.txt".into(),
                filepath: "/nowhere/b.txt".into(),
                knowledge_file_id: None,
            },
            MissingFile {
                filename: "c.txt".into(),
                filepath: "/nowhere/c.txt".into(),
                knowledge_file_id: None,
            },
        ];

        let resolved = resolve_missing(&missing, Some(files_dir.path()));

        assert_eq!(
            resolved.found,
            vec![recorded.path().join("a.txt"), files_dir.path().join("b.txt")]
        );
        assert_eq!(resolved.not_found, vec!["c.txt".to_string()]);
        let tasks = resolved.into_tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].file_size, 1);
    }

    #[test]
    fn names_resolve_under_files_dir() {
        let files_dir = tempdir().unwrap();
        std::fs::write(files_dir.path().join("x.txt"), b"x").unwrap();

        let resolved = resolve_by_name(["x.txt", "y.txt"], files_dir.path());

        assert_eq!(resolved.found, vec![files_dir.path().join("x.txt")]);
        assert_eq!(resolved.not_found, vec!["y.txt".to_string()]);
    }

    #[test]
    fn deletion_log_counts_outcomes() {
        let outcome = DeletionOutcome {
            deleted_files: vec![deleted(&target("A"), true)],
            failed_deletions: vec![failed(&target("B"), "boom".into())],
        };

        let log = DeletionLog::new("kb-1", Path::new("/r/integrity.json"), 2, outcome);
        let value = serde_json::to_value(&log).unwrap();

        assert_eq!(value["successful_deletions"], 1);
        assert_eq!(value["failed_deletions_count"], 1);
        assert_eq!(value["deleted_files"][0]["assumed"], true);
        assert_eq!(value["failed_deletions"][0]["error"], "boom");
        assert_eq!(value["integrity_report_used"], "/r/integrity.json");
    }
}
