use anyhow::{Context, Result};
use sheetsync::{
    config::AppConfig,
    report::{ReportFormat, write_report, write_summary},
    services::importer::FolderImporter,
    store::LocalStore,
};
use std::{io, process::ExitCode, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup (stderr; stdout carries the report) ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

/// Returns whether every file reconciled without failure.
async fn run() -> Result<bool> {
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting sheetsync with config: {:?}", cfg);

    // --- Initialize backend (a dry run must not create or migrate anything) ---
    let store = if cfg.dry_run {
        LocalStore::open_read_only(
            &cfg.database_url,
            cfg.store_dir.clone(),
            &cfg.bucket,
            &cfg.region,
        )
        .await
    } else {
        LocalStore::open(
            &cfg.database_url,
            cfg.store_dir.clone(),
            &cfg.bucket,
            &cfg.region,
        )
        .await
    }
    .with_context(|| format!("opening object store at {}", cfg.store_dir.display()))?;

    // --- Ctrl-C stops scheduling; in-flight files finish ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("received ctrl-c, finishing in-flight files");
                cancel.cancel();
            }
        });
    }

    let importer = FolderImporter::new(Arc::new(store), cfg.import_options());
    let format = if cfg.json {
        ReportFormat::Json
    } else {
        ReportFormat::Text
    };

    let mut out = io::stdout().lock();
    let summary = importer
        .run(&cfg.dirs, cancel, |report| {
            if let Err(err) = write_report(&mut out, format, report) {
                tracing::warn!("writing report: {}", err);
            }
        })
        .await?;
    write_summary(&mut out, format, &summary)?;

    Ok(summary.is_success())
}
