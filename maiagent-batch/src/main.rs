use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use maiagent_batch::audit::cleanup::DeletePacing;
use maiagent_batch::cli::{Cli, Command};
use maiagent_batch::config::BatchConfig;
use maiagent_batch::confirm::confirm_on_terminal;
use maiagent_batch::runtime::BatchRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = BatchConfig::from_env().context("invalid configuration")?;
    if let Some(dir) = cli.dir {
        config.files_dir = Some(dir);
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_root = output_dir;
    }
    if let Command::Upload {
        include_existing: true,
    } = cli.command
    {
        config.skip_existing_remote = false;
    }

    let runtime = BatchRuntime::bootstrap(config)?;
    let cancel = runtime.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing checkpoint before exit");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::Upload { .. } => {
            let outcome = runtime.upload().await?;
            info!(report = %outcome.report_path.display(), "upload report saved");
            if let Some((integrity, path)) = outcome.integrity {
                info!(
                    report = %path.display(),
                    missing = integrity.summary.missing,
                    extra = integrity.summary.extra,
                    "integrity report saved"
                );
            }
        }
        Command::Verify => {
            let (report, path) = runtime.verify().await?;
            info!(
                report = %path.display(),
                missing = report.summary.missing,
                extra = report.summary.extra,
                "integrity report saved"
            );
        }
        Command::ScanStatus { max_pages } => {
            let (report, path) = runtime.scan_status(max_pages).await?;
            info!(
                report = %path.display(),
                scanned = report.total_scanned,
                "status report saved"
            );
        }
        Command::DeleteExtra { report } => {
            runtime
                .delete_extra(&report, confirm_on_terminal, DeletePacing::default())
                .await?;
        }
        Command::UploadMissing { report } => {
            runtime.upload_missing(&report, confirm_on_terminal).await?;
        }
        Command::FixFailed { report } => {
            runtime
                .fix_failed(&report, confirm_on_terminal, DeletePacing::default())
                .await?;
        }
    }
    Ok(())
}
