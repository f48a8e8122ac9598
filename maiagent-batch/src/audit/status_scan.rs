use maiagent_core::{CreatedAt, FileStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::timefmt;
use crate::upload::gateway::{GatewayError, RemoteFileRecord, RemoteGateway, list_all_files};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    pub id: String,
    pub filename: String,
    pub status: FileStatus,
    #[serde(default)]
    pub created_at: Option<CreatedAt>,
}

impl From<RemoteFileRecord> for ScannedFile {
    fn from(record: RemoteFileRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            status: record.status,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub initial: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
    pub other: usize,
}

/// Knowledge-base files bucketed by processing status. `done` files are only counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub scan_time: String,
    pub knowledge_base_id: String,
    pub total_scanned: usize,
    pub summary: StatusCounts,
    #[serde(default)]
    pub initial_files: Vec<ScannedFile>,
    #[serde(default)]
    pub processing_files: Vec<ScannedFile>,
    #[serde(default)]
    pub failed_files: Vec<ScannedFile>,
    #[serde(default)]
    pub other_files: Vec<ScannedFile>,
}

impl StatusReport {
    pub fn from_records(knowledge_base_id: &str, records: Vec<RemoteFileRecord>) -> Self {
        let mut report = Self {
            scan_time: timefmt::now_rfc3339(),
            knowledge_base_id: knowledge_base_id.to_string(),
            total_scanned: records.len(),
            ..Self::default()
        };
        for record in records {
            let file = ScannedFile::from(record);
            match file.status {
                FileStatus::Initial => report.initial_files.push(file),
                FileStatus::Processing => report.processing_files.push(file),
                FileStatus::Done => report.summary.done += 1,
                FileStatus::Failed => report.failed_files.push(file),
                FileStatus::Other => report.other_files.push(file),
            }
        }
        report.summary.initial = report.initial_files.len();
        report.summary.processing = report.processing_files.len();
        report.summary.failed = report.failed_files.len();
        report.summary.other = report.other_files.len();
        report
    }

    /// Files stuck in initial or processing, or failed outright.
    pub fn problematic(&self) -> impl Iterator<Item = &ScannedFile> {
        self.initial_files
            .iter()
            .chain(&self.processing_files)
            .chain(&self.failed_files)
    }
}

pub async fn scan_status<G>(
    gateway: &G,
    knowledge_base_id: &str,
    max_pages: Option<u32>,
) -> Result<StatusReport, GatewayError>
where
    G: RemoteGateway + ?Sized,
{
    let records = list_all_files(gateway, max_pages).await?;
    let report = StatusReport::from_records(knowledge_base_id, records);
    let summary = &report.summary;
    info!(
        scanned = report.total_scanned,
        initial = summary.initial,
        processing = summary.processing,
        done = summary.done,
        failed = summary.failed,
        other = summary.other,
        "status scan finished"
    );
    let problematic = report.problematic().count();
    if problematic > 0 {
        warn!(files = problematic, "files may need attention");
        for file in report.problematic().take(10) {
            let created_at = file
                .created_at
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                file = %file.filename,
                status = file.status.as_str(),
                %created_at,
                "file not done"
            );
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryGateway, record};

    fn sample() -> Vec<RemoteFileRecord> {
        vec![
            record("1", "a.txt", FileStatus::Done),
            record("2", "b.txt", FileStatus::Initial),
            record("3", "c.txt", FileStatus::Processing),
            record("4", "d.txt", FileStatus::Failed),
            record("5", "e.txt", FileStatus::Other),
            record("6", "f.txt", FileStatus::Done),
        ]
    }

    #[test]
    fn buckets_files_by_status() {
        let report = StatusReport::from_records("kb-1", sample());

        assert_eq!(report.total_scanned, 6);
        assert_eq!(
            report.summary,
            StatusCounts {
                initial: 1,
                processing: 1,
                done: 2,
                failed: 1,
                other: 1,
            }
        );
        assert_eq!(report.failed_files[0].id, "4");
        let problematic: Vec<_> = report.problematic().map(|f| f.id.as_str()).collect();
        assert_eq!(problematic, vec!["2", "3", "4"]);
    }

    #[test]
    fn report_serializes_with_bucket_keys() {
        let report = StatusReport::from_records("kb-1", sample());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["summary"]["done"], 2);
        assert_eq!(value["failed_files"][0]["filename"], "d.txt");
        assert_eq!(value["failed_files"][0]["status"], "failed");
        assert!(value["scan_time"].is_string());
    }

    #[tokio::test]
    async fn scan_respects_page_limit() {
        let gateway = MemoryGateway::new().with_remote(sample());

        let limited = scan_status(&gateway, "kb-1", Some(1)).await.unwrap();
        let full = scan_status(&gateway, "kb-1", None).await.unwrap();

        assert_eq!(limited.total_scanned, 2);
        assert_eq!(full.total_scanned, 6);
    }
}
