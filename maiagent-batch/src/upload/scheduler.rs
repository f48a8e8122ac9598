use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::Backoff;
use super::checkpoint::{CheckpointDelta, CheckpointError, CheckpointStore};
use super::gateway::{GatewayError, RemoteGateway};
use super::progress::ProgressTracker;
use super::queue::TaskQueue;
use super::task::{UploadStatus, UploadTask};
use crate::config::UploadConfig;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("checkpoint save failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("upload worker crashed: {0}")]
    Worker(String),
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Files left out before scheduling: already completed or already remote.
    pub skipped: usize,
    pub provisional: usize,
    pub interrupted: bool,
    /// Seconds, averaged over successful uploads.
    pub average_upload_time: f64,
    #[serde(skip)]
    pub tasks: Vec<UploadTask>,
    pub pending: Vec<String>,
}

impl RunSummary {
    fn from_tasks(
        total: usize,
        mut tasks: Vec<UploadTask>,
        pending: Vec<String>,
        interrupted: bool,
    ) -> Self {
        tasks.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        let successes: Vec<&UploadTask> = tasks
            .iter()
            .filter(|task| task.status == UploadStatus::Success)
            .collect();
        let durations: Vec<f64> = successes
            .iter()
            .filter_map(|task| task.upload_duration)
            .map(|duration| duration.as_secs_f64())
            .collect();
        let average_upload_time = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };
        Self {
            total,
            successful: successes.len(),
            failed: tasks
                .iter()
                .filter(|task| task.status == UploadStatus::Failed)
                .count(),
            skipped: 0,
            provisional: successes.iter().filter(|task| task.is_provisional()).count(),
            interrupted,
            average_upload_time,
            pending,
            tasks,
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks
            .iter()
            .filter(|task| task.status == UploadStatus::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UploadTask> {
        self.tasks
            .iter()
            .filter(|task| task.status == UploadStatus::Failed)
    }
}

/// Runs upload tasks through a fixed pool of workers sharing one queue.
pub struct UploadScheduler<G> {
    gateway: Arc<G>,
    checkpoint: Arc<CheckpointStore>,
    config: Arc<UploadConfig>,
    cancel: CancellationToken,
}

impl<G> UploadScheduler<G>
where
    G: RemoteGateway + 'static,
{
    pub fn new(gateway: Arc<G>, checkpoint: Arc<CheckpointStore>, config: UploadConfig) -> Self {
        Self {
            gateway,
            checkpoint,
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, tasks: Vec<UploadTask>) -> Result<RunSummary, SchedulerError> {
        let total = tasks.len();
        if total == 0 {
            info!("nothing to upload");
            return Ok(RunSummary::default());
        }

        self.checkpoint
            .save(CheckpointDelta::pending(
                tasks.iter().map(UploadTask::path_key).collect(),
            ))
            .await?;

        let queue = Arc::new(TaskQueue::from_tasks(tasks));
        let progress = Arc::new(ProgressTracker::new(total));
        // Child token: a fatal worker error stops the pool without marking the caller's token.
        let stop = self.cancel.child_token();
        let worker_count = self.config.max_concurrent_uploads.clamp(1, total);
        info!(
            files = total,
            workers = worker_count,
            max_retries = self.config.max_retries,
            "starting upload run"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                gateway: Arc::clone(&self.gateway),
                checkpoint: Arc::clone(&self.checkpoint),
                config: Arc::clone(&self.config),
                backoff: backoff_for(&self.config),
                queue: Arc::clone(&queue),
                progress: Arc::clone(&progress),
                stop: stop.clone(),
            };
            workers.spawn(worker.run());
        }

        let mut finished = Vec::with_capacity(total);
        let mut abandoned = Vec::new();
        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(output)) => {
                    finished.extend(output.finished);
                    abandoned.extend(output.abandoned);
                }
                Ok(Err(err)) => {
                    stop.cancel();
                    fatal.get_or_insert(err);
                }
                Err(err) => {
                    stop.cancel();
                    fatal.get_or_insert(SchedulerError::Worker(err.to_string()));
                }
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }

        let interrupted = self.cancel.is_cancelled();
        let mut pending: Vec<String> = abandoned
            .into_iter()
            .chain(queue.drain())
            .map(|task| task.path_key())
            .collect();
        pending.sort();
        self.checkpoint
            .save(CheckpointDelta::pending(pending.clone()))
            .await?;
        if interrupted {
            warn!(pending = pending.len(), "upload run interrupted; pending files recorded");
        }
        progress.finish();

        Ok(RunSummary::from_tasks(total, finished, pending, interrupted))
    }
}

fn backoff_for(config: &UploadConfig) -> Backoff {
    let cap = config
        .retry_delay_base
        .saturating_mul(config.max_retries.max(1));
    Backoff::new(config.retry_delay_base, cap, config.retry_jitter)
}

#[derive(Debug, Default)]
struct WorkerOutput {
    finished: Vec<UploadTask>,
    abandoned: Vec<UploadTask>,
}

struct Worker<G> {
    id: usize,
    gateway: Arc<G>,
    checkpoint: Arc<CheckpointStore>,
    config: Arc<UploadConfig>,
    backoff: Backoff,
    queue: Arc<TaskQueue>,
    progress: Arc<ProgressTracker>,
    stop: CancellationToken,
}

impl<G> Worker<G>
where
    G: RemoteGateway + 'static,
{
    async fn run(self) -> Result<WorkerOutput, SchedulerError> {
        let mut output = WorkerOutput::default();
        while !self.stop.is_cancelled() {
            let Some(task) = self.queue.claim() else {
                break;
            };
            let outcome = tokio::select! {
                biased;
                _ = self.stop.cancelled() => None,
                done = self.process(task.clone()) => Some(done),
            };
            let Some(task) = outcome else {
                output.abandoned.push(task);
                break;
            };

            let delta = match task.status {
                UploadStatus::Success => {
                    CheckpointDelta::completed(task.path_key(), task.remote_file_id.clone())
                }
                _ => CheckpointDelta::failed(
                    task.path_key(),
                    task.error_message.clone().unwrap_or_default(),
                ),
            };
            self.checkpoint.save(delta).await?;
            if task.status == UploadStatus::Success {
                self.progress.record_success();
            } else {
                self.progress.record_failure();
            }
            output.finished.push(task);
        }
        Ok(output)
    }

    async fn process(&self, mut task: UploadTask) -> UploadTask {
        task.status = UploadStatus::Uploading;
        let started = Instant::now();
        loop {
            match self.attempt(&task).await {
                Ok(file_id) => {
                    info!(
                        worker = self.id,
                        file = %task.file_path.display(),
                        file_id = %file_id,
                        retries = task.retry_count,
                        "uploaded"
                    );
                    task.status = UploadStatus::Success;
                    task.remote_file_id = Some(file_id);
                    task.error_message = None;
                }
                Err(err) if self.is_ambiguous(&err) => {
                    warn!(
                        worker = self.id,
                        file = %task.file_path.display(),
                        error = %err,
                        "registration answered ambiguously; recording provisional success"
                    );
                    task.status = UploadStatus::Success;
                    task.error_message = None;
                    task.note = Some(format!(
                        "registration returned HTTP {}; file is probably registered, confirm with an integrity check",
                        err.status().unwrap_or_default()
                    ));
                }
                Err(err) if err.is_retryable() && task.retry_count < self.config.max_retries => {
                    task.retry_count += 1;
                    let delay = self.backoff.delay(task.retry_count);
                    warn!(
                        worker = self.id,
                        file = %task.file_path.display(),
                        error = %err,
                        attempt = task.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "upload attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => {
                    error!(
                        worker = self.id,
                        file = %task.file_path.display(),
                        error = %err,
                        retries = task.retry_count,
                        "upload failed"
                    );
                    task.status = UploadStatus::Failed;
                    task.error_message = Some(err.to_string());
                }
            }
            break;
        }
        task.upload_duration = Some(started.elapsed());
        task
    }

    async fn attempt(&self, task: &UploadTask) -> Result<String, GatewayError> {
        tokio::fs::metadata(&task.file_path)
            .await
            .map_err(|source| GatewayError::FileSystem {
                path: task.file_path.clone(),
                source,
            })?;
        let filename = task.filename();
        let slot = self
            .timed(self.gateway.request_upload_slot(&filename, task.file_size))
            .await?;
        let object_key = self
            .timed(self.gateway.push_bytes(&slot, &task.file_path, &filename))
            .await?;
        self.timed(self.gateway.register_file(&object_key, &filename))
            .await
    }

    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::time::timeout(self.config.timeout, call)
            .await
            .unwrap_or(Err(GatewayError::Timeout))
    }

    fn is_ambiguous(&self, err: &GatewayError) -> bool {
        matches!(err, GatewayError::RegistrationFailed { status, .. }
            if self.config.ambiguous_registration_statuses.contains(status))
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
