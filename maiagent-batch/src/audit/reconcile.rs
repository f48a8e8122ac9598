use std::collections::HashSet;
use std::path::Path;

use maiagent_core::{CreatedAt, FileStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::timefmt;
use crate::upload::checkpoint::CheckpointRecord;
use crate::upload::gateway::{GatewayError, RemoteFileRecord, RemoteGateway, list_all_files};
use crate::upload::task::filename_of;

/// Recorded as uploaded locally, absent remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingFile {
    pub filename: String,
    pub filepath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_file_id: Option<String>,
}

/// Present remotely, never recorded by this batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraFile {
    pub knowledge_file_id: String,
    pub filename: String,
    #[serde(default)]
    pub created_at: Option<CreatedAt>,
    #[serde(default)]
    pub status: FileStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySummary {
    pub total_kb_files: usize,
    pub total_uploaded_files: usize,
    pub missing: usize,
    pub extra: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub timestamp: String,
    #[serde(default)]
    pub knowledge_base_id: String,
    pub summary: IntegritySummary,
    #[serde(default)]
    pub missing_files: Vec<MissingFile>,
    #[serde(default)]
    pub extra_files: Vec<ExtraFile>,
    /// Provisional uploads with no same-named remote file; also listed as missing.
    #[serde(default)]
    pub unconfirmed_files: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.extra_files.is_empty()
    }
}

/// Diffs recorded ids against remote ids.
///
/// Provisional paths have no id; each one claims at most one unclaimed remote
/// record with the same file name.
pub fn reconcile(checkpoint: &CheckpointRecord, remote: &[RemoteFileRecord]) -> IntegrityReport {
    let remote_ids: HashSet<&str> = remote.iter().map(|record| record.id.as_str()).collect();
    let recorded_ids: HashSet<&str> = checkpoint
        .file_id_mapping
        .values()
        .map(String::as_str)
        .collect();

    let mut missing_files: Vec<MissingFile> = checkpoint
        .file_id_mapping
        .iter()
        .filter(|(_, id)| !remote_ids.contains(id.as_str()))
        .map(|(path, id)| MissingFile {
            filename: filename_of(Path::new(path)),
            filepath: path.clone(),
            knowledge_file_id: Some(id.clone()),
        })
        .collect();

    let mut unclaimed: Vec<&RemoteFileRecord> = remote
        .iter()
        .filter(|record| !recorded_ids.contains(record.id.as_str()))
        .collect();

    let mut unconfirmed_files = Vec::new();
    for path in &checkpoint.provisional_files {
        if checkpoint.file_id_mapping.contains_key(path) {
            continue;
        }
        let filename = filename_of(Path::new(path));
        match unclaimed.iter().position(|record| record.filename == filename) {
            Some(index) => {
                unclaimed.remove(index);
            }
            None => {
                unconfirmed_files.push(path.clone());
                missing_files.push(MissingFile {
                    filename,
                    filepath: path.clone(),
                    knowledge_file_id: None,
                });
            }
        }
    }

    let extra_files: Vec<ExtraFile> = unclaimed
        .into_iter()
        .map(|record| ExtraFile {
            knowledge_file_id: record.id.clone(),
            filename: record.filename.clone(),
            created_at: record.created_at.clone(),
            status: record.status,
        })
        .collect();

    IntegrityReport {
        timestamp: timefmt::now_rfc3339(),
        knowledge_base_id: String::new(),
        summary: IntegritySummary {
            total_kb_files: remote.len(),
            total_uploaded_files: checkpoint.completed_files.len(),
            missing: missing_files.len(),
            extra: extra_files.len(),
        },
        missing_files,
        extra_files,
        unconfirmed_files,
    }
}

/// Lists the whole knowledge base and reconciles it with `checkpoint`.
pub async fn verify<G>(
    gateway: &G,
    checkpoint: &CheckpointRecord,
    knowledge_base_id: &str,
) -> Result<IntegrityReport, GatewayError>
where
    G: RemoteGateway + ?Sized,
{
    let remote = list_all_files(gateway, None).await?;
    let mut report = reconcile(checkpoint, &remote);
    report.knowledge_base_id = knowledge_base_id.to_string();

    if report.is_clean() {
        info!(
            kb_files = report.summary.total_kb_files,
            uploaded = report.summary.total_uploaded_files,
            "integrity check passed"
        );
    } else {
        warn!(
            kb_files = report.summary.total_kb_files,
            uploaded = report.summary.total_uploaded_files,
            missing = report.summary.missing,
            extra = report.summary.extra,
            unconfirmed = report.unconfirmed_files.len(),
            "integrity check found discrepancies"
        );
        for file in report.missing_files.iter().take(10) {
            warn!(file = %file.filepath, "missing from knowledge base");
        }
        for file in report.extra_files.iter().take(10) {
            warn!(file = %file.filename, id = %file.knowledge_file_id, "not recorded by this batch");
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryGateway, record};
    use crate::upload::checkpoint::CheckpointDelta;

    fn checkpoint_with(entries: &[(&str, Option<&str>)]) -> CheckpointRecord {
        let mut checkpoint = CheckpointRecord::default();
        for (path, id) in entries {
            checkpoint.merge(CheckpointDelta::completed(*path, id.map(str::to_string)));
        }
        checkpoint
    }

    #[test]
    fn diff_of_id_sets_yields_missing_and_extra() {
        let checkpoint = checkpoint_with(&[
            ("/d/a.txt", Some("A")),
            ("/d/b.txt", Some("B")),
            ("/d/d.txt", Some("D")),
        ]);
        let remote = vec![
            record("A", "a.txt", FileStatus::Done),
            record("B", "b.txt", FileStatus::Done),
            record("C", "c.txt", FileStatus::Processing),
        ];

        let report = reconcile(&checkpoint, &remote);

        assert_eq!(
            report.missing_files,
            vec![MissingFile {
                filename: "d.txt".into(),
                filepath: "/d/d.txt".into(),
                knowledge_file_id: Some("D".into()),
            }]
        );
        assert_eq!(report.extra_files.len(), 1);
        assert_eq!(report.extra_files[0].knowledge_file_id, "C");
        assert_eq!(report.extra_files[0].filename, "c.txt");
        assert_eq!(
            report.summary,
            IntegritySummary {
                total_kb_files: 3,
                total_uploaded_files: 3,
                missing: 1,
                extra: 1,
            }
        );
    }

    #[test]
    fn provisional_upload_claims_same_named_remote_file() {
        let checkpoint = checkpoint_with(&[("/d/a.txt", Some("A")), ("/d/p.txt", None)]);
        let remote = vec![
            record("A", "a.txt", FileStatus::Done),
            record("P", "p.txt", FileStatus::Initial),
        ];

        let report = reconcile(&checkpoint, &remote);

        assert!(report.is_clean());
        assert!(report.unconfirmed_files.is_empty());
    }

    #[test]
    fn unmatched_provisional_upload_is_missing_and_unconfirmed() {
        let checkpoint = checkpoint_with(&[("/d/p.txt", None), ("/d/q.txt", None)]);
        let remote = vec![record("P", "p.txt", FileStatus::Done)];

        let report = reconcile(&checkpoint, &remote);

        assert_eq!(report.unconfirmed_files, vec!["/d/q.txt".to_string()]);
        assert_eq!(report.missing_files.len(), 1);
        assert_eq!(report.missing_files[0].knowledge_file_id, None);
        assert!(report.extra_files.is_empty());
    }

    #[test]
    fn one_remote_file_confirms_only_one_provisional_path() {
        let checkpoint = checkpoint_with(&[("/d/x/p.txt", None), ("/d/y/p.txt", None)]);
        let remote = vec![record("P", "p.txt", FileStatus::Done)];

        let report = reconcile(&checkpoint, &remote);

        assert_eq!(report.unconfirmed_files.len(), 1);
    }

    #[tokio::test]
    async fn verify_walks_every_page() {
        let gateway = MemoryGateway::new().with_remote(vec![
            record("A", "a.txt", FileStatus::Done),
            record("B", "b.txt", FileStatus::Done),
            record("C", "c.txt", FileStatus::Done),
            record("E", "e.txt", FileStatus::Failed),
        ]);
        let checkpoint = checkpoint_with(&[
            ("/d/a.txt", Some("A")),
            ("/d/b.txt", Some("B")),
            ("/d/c.txt", Some("C")),
        ]);

        let report = verify(&gateway, &checkpoint, "kb-1").await.unwrap();

        assert_eq!(report.knowledge_base_id, "kb-1");
        assert_eq!(report.summary.total_kb_files, 4);
        assert_eq!(report.extra_files[0].knowledge_file_id, "E");
        assert_eq!(report.extra_files[0].status, FileStatus::Failed);
        assert!(report.missing_files.is_empty());
    }
}
