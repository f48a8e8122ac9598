use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use maiagent_core::{DEFAULT_BASE_URL, MaiAgentClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::cleanup::{
    DeletePacing, DeletionLog, DeletionTarget, FixFailedLog, MissingUploadLog,
    ReuploadResults, delete_files, resolve_by_name, resolve_missing,
};
use crate::audit::reconcile::{IntegrityReport, verify};
use crate::audit::status_scan::{StatusReport, scan_status};
use crate::config::BatchConfig;
use crate::report::{ReportWriter, UploadReport, load_report};
use crate::upload::checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore};
use crate::upload::gateway::{KnowledgeBaseGateway, RemoteGateway, list_all_files};
use crate::upload::scan::{plan_tasks, scan_directory};
use crate::upload::scheduler::{RunSummary, UploadScheduler};
use crate::upload::task::UploadTask;
use crate::upload::transfer::StorageClient;

/// Result of `upload`: the run summary plus the artifacts written for it.
#[derive(Debug)]
pub struct UploadOutcome {
    pub summary: RunSummary,
    pub report_path: PathBuf,
    pub integrity: Option<(IntegrityReport, PathBuf)>,
}

/// Result of a follow-up command; `log_path` is `None` when nothing was done.
#[derive(Debug)]
pub struct CommandOutcome {
    pub log_path: Option<PathBuf>,
}

impl CommandOutcome {
    fn nothing_to_do() -> Self {
        Self { log_path: None }
    }
}

pub struct BatchRuntime<G> {
    config: BatchConfig,
    gateway: Arc<G>,
    checkpoint: Arc<CheckpointStore>,
    reports: ReportWriter,
    cancel: CancellationToken,
}

impl BatchRuntime<KnowledgeBaseGateway> {
    pub fn bootstrap(config: BatchConfig) -> anyhow::Result<Self> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let client = MaiAgentClient::with_timeout(base_url, &config.api_key, config.upload.timeout)
            .context("failed to build API client")?;
        let storage = StorageClient::with_timeout(config.upload.timeout)
            .context("failed to build storage client")?;
        let gateway = KnowledgeBaseGateway::new(client, storage, &config.knowledge_base_id)
            .with_page_size(config.page_size);
        Ok(Self::with_gateway(config, Arc::new(gateway)))
    }
}

impl<G> BatchRuntime<G>
where
    G: RemoteGateway + 'static,
{
    pub fn with_gateway(config: BatchConfig, gateway: Arc<G>) -> Self {
        let checkpoint = Arc::new(CheckpointStore::in_dir(&config.checkpoint_dir()));
        let reports = ReportWriter::new(config.report_dir());
        Self {
            config,
            gateway,
            checkpoint,
            reports,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Scans, plans, uploads, writes the run report, then reconciles.
    pub async fn upload(&self) -> anyhow::Result<UploadOutcome> {
        let files_dir = self.config.require_files_dir()?;
        info!(
            dir = %files_dir.display(),
            kb = %self.config.knowledge_base_id,
            output = %self.config.run_dir().display(),
            "starting batch upload"
        );

        let scanned = scan_directory(files_dir)
            .with_context(|| format!("failed to scan {}", files_dir.display()))?;
        let checkpoint = self
            .checkpoint
            .load_or_default()
            .await
            .context("failed to read checkpoint")?;
        if !checkpoint.completed_files.is_empty() {
            info!(
                completed = checkpoint.completed_files.len(),
                "resuming from checkpoint"
            );
        }
        let existing = if self.config.skip_existing_remote {
            Some(self.remote_filenames().await?)
        } else {
            None
        };

        let scanned_count = scanned.len();
        let planned = plan_tasks(scanned, &checkpoint, existing.as_ref());
        let skipped = scanned_count - planned.len();
        let mut summary = self.scheduler().run(planned).await?;
        summary.skipped = skipped;
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            provisional = summary.provisional,
            skipped = summary.skipped,
            "upload run complete"
        );
        for task in summary.failures() {
            warn!(
                file = %task.file_path.display(),
                retries = task.retry_count,
                error = task.error_message.as_deref().unwrap_or("unknown error"),
                "file not uploaded"
            );
        }

        let report = UploadReport::from_summary(&self.config.knowledge_base_id, &summary);
        let report_path = self.reports.write_upload_report(&report).await?;

        if summary.interrupted {
            warn!("run interrupted; skipping integrity check until the upload is resumed");
            return Ok(UploadOutcome {
                summary,
                report_path,
                integrity: None,
            });
        }
        let checkpoint = self
            .checkpoint
            .load_or_default()
            .await
            .context("failed to read checkpoint")?;
        let integrity = self.reconcile(&checkpoint).await?;
        Ok(UploadOutcome {
            summary,
            report_path,
            integrity: Some(integrity),
        })
    }

    pub async fn verify(&self) -> anyhow::Result<(IntegrityReport, PathBuf)> {
        let checkpoint = match self.checkpoint.load().await {
            Ok(record) => record,
            Err(CheckpointError::NotFound(path)) => anyhow::bail!(
                "no checkpoint at {}; run an upload first",
                path.display()
            ),
            Err(err) => {
                return Err(anyhow::Error::new(err).context("failed to read checkpoint"));
            }
        };
        self.reconcile(&checkpoint).await
    }

    async fn reconcile(
        &self,
        checkpoint: &CheckpointRecord,
    ) -> anyhow::Result<(IntegrityReport, PathBuf)> {
        let report = verify(
            self.gateway.as_ref(),
            checkpoint,
            &self.config.knowledge_base_id,
        )
        .await
        .context("failed to list knowledge base files")?;
        let path = self.reports.write_integrity_report(&report).await?;
        Ok((report, path))
    }

    pub async fn scan_status(
        &self,
        max_pages: Option<u32>,
    ) -> anyhow::Result<(StatusReport, PathBuf)> {
        let report = scan_status(
            self.gateway.as_ref(),
            &self.config.knowledge_base_id,
            max_pages,
        )
        .await
        .context("failed to scan knowledge base")?;
        let path = self.reports.write_status_report(&report).await?;
        Ok((report, path))
    }

    /// Deletes the extra files listed in an integrity report after confirmation.
    pub async fn delete_extra<C>(
        &self,
        report_path: &Path,
        confirm: C,
        pacing: DeletePacing,
    ) -> anyhow::Result<CommandOutcome>
    where
        C: FnOnce(&str) -> io::Result<bool>,
    {
        let report: IntegrityReport = load_report(report_path)
            .await
            .context("failed to read integrity report")?;
        let targets: Vec<DeletionTarget> = report.extra_files.iter().map(Into::into).collect();
        if targets.is_empty() {
            info!("integrity report lists no extra files");
            return Ok(CommandOutcome::nothing_to_do());
        }
        for target in targets.iter().take(10) {
            info!(file = %target.filename, id = %target.knowledge_file_id, "will delete");
        }
        if !confirm(&format!("Delete {} extra files?", targets.len()))? {
            info!("deletion cancelled");
            return Ok(CommandOutcome::nothing_to_do());
        }

        let outcome = delete_files(self.gateway.as_ref(), &targets, pacing).await;
        let log = DeletionLog::new(
            &self.config.knowledge_base_id,
            report_path,
            targets.len(),
            outcome,
        );
        let log_path = self.reports.write_operation_log("deletion", &log).await?;
        Ok(CommandOutcome {
            log_path: Some(log_path),
        })
    }

    /// Uploads the missing files listed in an integrity report after confirmation.
    pub async fn upload_missing<C>(
        &self,
        report_path: &Path,
        confirm: C,
    ) -> anyhow::Result<CommandOutcome>
    where
        C: FnOnce(&str) -> io::Result<bool>,
    {
        let report: IntegrityReport = load_report(report_path)
            .await
            .context("failed to read integrity report")?;
        if report.missing_files.is_empty() {
            info!("integrity report lists no missing files");
            return Ok(CommandOutcome::nothing_to_do());
        }
        let files_dir = self.config.files_dir.as_deref();
        let resolved = resolve_missing(&report.missing_files, files_dir);
        log_unresolved(&resolved.not_found);
        if resolved.found.is_empty() {
            warn!("none of the missing files exist locally");
            return Ok(CommandOutcome::nothing_to_do());
        }
        if !confirm(&format!("Upload {} missing files?", resolved.found.len()))? {
            info!("upload cancelled");
            return Ok(CommandOutcome::nothing_to_do());
        }

        let not_found = resolved.not_found.clone();
        let summary = self.upload_tasks(resolved.into_tasks()).await?;
        let log = MissingUploadLog::new(
            &self.config.knowledge_base_id,
            files_dir,
            report_path,
            ReuploadResults::new(&summary, not_found),
        );
        let log_path = self
            .reports
            .write_operation_log("missing_files_upload", &log)
            .await?;
        Ok(CommandOutcome {
            log_path: Some(log_path),
        })
    }

    /// Deletes the failed files listed in a status report and uploads them again.
    pub async fn fix_failed<C>(
        &self,
        report_path: &Path,
        confirm: C,
        pacing: DeletePacing,
    ) -> anyhow::Result<CommandOutcome>
    where
        C: FnOnce(&str) -> io::Result<bool>,
    {
        let files_dir = self.config.require_files_dir()?.to_path_buf();
        let report: StatusReport = load_report(report_path)
            .await
            .context("failed to read status report")?;
        let targets: Vec<DeletionTarget> = report.failed_files.iter().map(Into::into).collect();
        if targets.is_empty() {
            info!("status report lists no failed files");
            return Ok(CommandOutcome::nothing_to_do());
        }
        for target in targets.iter().take(10) {
            info!(file = %target.filename, id = %target.knowledge_file_id, "will delete and re-upload");
        }
        if !confirm(&format!(
            "Delete and re-upload {} failed files?",
            targets.len()
        ))? {
            info!("fix cancelled");
            return Ok(CommandOutcome::nothing_to_do());
        }

        let deletions = delete_files(self.gateway.as_ref(), &targets, pacing).await;
        let resolved = resolve_by_name(
            deletions
                .deleted_files
                .iter()
                .map(|file| file.filename.as_str()),
            &files_dir,
        );
        log_unresolved(&resolved.not_found);
        let not_found = resolved.not_found.clone();
        let summary = if resolved.found.is_empty() {
            RunSummary::default()
        } else {
            self.upload_tasks(resolved.into_tasks()).await?
        };

        let log = FixFailedLog::new(
            &self.config.knowledge_base_id,
            &files_dir,
            report_path,
            deletions,
            ReuploadResults::new(&summary, not_found),
        );
        let log_path = self
            .reports
            .write_operation_log("fix_failed_files", &log)
            .await?;
        Ok(CommandOutcome {
            log_path: Some(log_path),
        })
    }

    async fn upload_tasks(&self, tasks: Vec<UploadTask>) -> anyhow::Result<RunSummary> {
        let summary = self.scheduler().run(tasks).await?;
        info!(
            successful = summary.successful,
            failed = summary.failed,
            "follow-up upload complete"
        );
        Ok(summary)
    }

    async fn remote_filenames(&self) -> anyhow::Result<HashSet<String>> {
        let records = list_all_files(self.gateway.as_ref(), None)
            .await
            .context("failed to list existing knowledge base files")?;
        let names: HashSet<String> = records.into_iter().map(|record| record.filename).collect();
        info!(files = names.len(), "knowledge base already holds files");
        Ok(names)
    }

    fn scheduler(&self) -> UploadScheduler<G> {
        UploadScheduler::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.checkpoint),
            self.config.upload.clone(),
        )
        .with_cancellation(self.cancel.clone())
    }
}

fn log_unresolved(not_found: &[String]) {
    if not_found.is_empty() {
        return;
    }
    warn!(files = not_found.len(), "files not found locally");
    for name in not_found.iter().take(5) {
        warn!(file = %name, "not found");
    }
}
