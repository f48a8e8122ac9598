use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resumable batch uploads into a MaiAgent knowledge base.
///
/// Credentials and tuning come from `MAIAGENT_*` environment variables,
/// optionally loaded from a `.env` file.
#[derive(Parser, Debug)]
#[command(name = "maiagent-batch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory of files to upload (overrides MAIAGENT_FILES_DIR).
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Root for checkpoints and reports (overrides MAIAGENT_OUTPUT_DIR).
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload every file not yet recorded, then run an integrity check.
    Upload {
        /// Upload even when a same-named file already exists remotely.
        #[arg(long)]
        include_existing: bool,
    },
    /// Compare the checkpoint with the knowledge base.
    Verify,
    /// Report knowledge-base files by processing status.
    ScanStatus {
        /// Stop after this many pages.
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Delete the extra files listed in an integrity report.
    DeleteExtra {
        #[arg(long)]
        report: PathBuf,
    },
    /// Upload the missing files listed in an integrity report.
    UploadMissing {
        #[arg(long)]
        report: PathBuf,
    },
    /// Delete and re-upload the failed files listed in a status report.
    FixFailed {
        #[arg(long)]
        report: PathBuf,
    },
}
