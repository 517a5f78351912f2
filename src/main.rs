use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unpack_uploader::Config;
use unpack_uploader::infrastructure::storage;
use unpack_uploader::services::ledger::Ledger;
use unpack_uploader::services::pipeline::Pipeline;
use unpack_uploader::services::uploader::Uploader;

/// Recursively extracts nested ZIP/BZ2 archives under a directory and
/// uploads the resulting files to an object-storage bucket.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Local directory to walk (the upload root)
    source: PathBuf,

    /// Destination bucket name
    bucket: String,

    /// Number of concurrent upload workers (default: 10, or UPLOAD_WORKERS)
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unpack_uploader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    let workers = args.workers.unwrap_or(config.workers);

    info!(
        "🚀 Uploading {} to bucket {} ({} workers, {} byte chunks)",
        args.source.display(),
        args.bucket,
        workers,
        config.chunk_size
    );

    anyhow::ensure!(
        args.source.is_dir(),
        "source path {} is not a directory",
        args.source.display()
    );

    // A corrupt ledger aborts startup rather than risking a re-upload storm.
    let ledger = Arc::new(Ledger::load(&config.ledger_path)?);
    info!(
        "📒 Ledger: {} ({} files already uploaded)",
        config.ledger_path.display(),
        ledger.len()
    );

    let store = storage::setup_storage(&args.bucket, config.chunk_size).await;
    let uploader = Arc::new(Uploader::new(
        store,
        ledger.clone(),
        config.max_attempts,
        Duration::from_secs(config.retry_delay_secs),
    ));

    let pipeline = Pipeline::new(args.source, uploader, ledger, workers);
    let report = pipeline.run().await?;

    info!(
        "✅ Done: {} uploaded, {} extracted, {} skipped, {} failed",
        report.uploaded, report.extracted, report.skipped, report.failed
    );

    if !report.all_succeeded() {
        for (path, message) in &report.failures {
            error!(path = %path, "{}", message);
        }
        anyhow::bail!("{} file(s) failed to upload", report.failed);
    }

    Ok(())
}
