//! NVD Ingest - load the NVD vulnerability feed into the warehouse

use anyhow::{Context, Result};
use clap::Parser;
use nvd_common::logging::{init_logging, LogConfig, LogLevel};
use nvd_ingest::config::EtlConfig;
use nvd_ingest::feed::HttpFeedFetcher;
use nvd_ingest::publish::Publisher;
use nvd_ingest::storage::S3Storage;
use nvd_ingest::warehouse::BigQueryClient;
use nvd_ingest::RunController;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "nvd-ingest")]
#[command(author, version, about = "Load the NVD vulnerability feed into the warehouse")]
struct Cli {
    /// Config file (defaults to ./config.yml when present)
    #[arg(short, long, env = "NVD_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("nvd-ingest")
        .build()
        .merge_env();

    let log_guard = match log_config.map(|config| init_logging(&config)) {
        Ok(Ok(guard)) => guard,
        Ok(Err(e)) | Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        },
    };

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Run failed");
        println!("nvd-ingest failed: {e}");
        for cause in e.chain().skip(1) {
            println!("  caused by: {cause}");
        }
    }

    // Flush file logs before exiting
    drop(log_guard);
    if result.is_err() {
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = EtlConfig::load(cli.config.as_deref()).context("cannot load configuration")?;
    let schema = config.load_schema().context("cannot load configuration")?;

    info!(
        dataset = %config.dataset,
        bucket = %config.bucket_name,
        staging = %config.local_path.display(),
        "Starting NVD ingest"
    );

    let fetcher = HttpFeedFetcher::new(config.feed_config())?;
    let warehouse = Arc::new(BigQueryClient::new(config.warehouse_config())?);
    let storage = Arc::new(S3Storage::new(config.storage_config()).await);

    let mut controller = RunController::new(
        Arc::new(fetcher),
        warehouse.clone(),
        Publisher::new(storage, warehouse),
        config.feed_config(),
        schema,
        config.run_settings(),
    );

    let report = controller.run().await?;
    info!(
        mode = ?report.mode,
        initial_rows = report.initial_rows,
        submitted = report.submitted(),
        published = report.published(),
        "Ingest complete"
    );
    for outcome in &report.units {
        if let Some(receipt) = &outcome.published {
            info!(
                unit = %outcome.unit,
                uri = %receipt.uri,
                digest = %receipt.digest,
                job_id = %receipt.job.job_id,
                "Published unit"
            );
        }
    }

    Ok(())
}
