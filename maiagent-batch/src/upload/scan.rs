use std::collections::HashSet;
use std::io;
use std::path::Path;

use tracing::{info, warn};
use walkdir::{DirEntry, WalkDir};

use super::checkpoint::CheckpointRecord;
use super::task::UploadTask;

/// Regular files under `root`, recursively, sorted by path. Dotfiles and
/// dot-directories are skipped.
pub fn scan_directory(root: &Path) -> io::Result<Vec<UploadTask>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut tasks = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => tasks.push(UploadTask::new(entry.into_path(), metadata.len())),
            Err(err) => warn!(path = %entry.path().display(), error = %err, "skipping file without metadata"),
        }
    }
    tasks.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    info!(root = %root.display(), files = tasks.len(), "scanned source directory");
    Ok(tasks)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Drops tasks already completed in the checkpoint and, when given, tasks whose
/// file name already exists in the knowledge base.
pub fn plan_tasks(
    scanned: Vec<UploadTask>,
    checkpoint: &CheckpointRecord,
    existing_remote_filenames: Option<&HashSet<String>>,
) -> Vec<UploadTask> {
    let total = scanned.len();
    let mut already_completed = 0usize;
    let mut already_remote = 0usize;
    let planned: Vec<UploadTask> = scanned
        .into_iter()
        .filter(|task| {
            if checkpoint.is_completed(&task.path_key()) {
                already_completed += 1;
                return false;
            }
            if existing_remote_filenames.is_some_and(|names| names.contains(&task.filename())) {
                already_remote += 1;
                return false;
            }
            true
        })
        .collect();
    info!(
        total,
        already_completed,
        already_remote,
        to_upload = planned.len(),
        "planned upload"
    );
    planned
}
