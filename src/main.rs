use anyhow::{Context, Result};
use bytesize::MIB;
use clap::Parser;
use cobalt_mpu_bench::bench::{Benchmark, RunTotals};
use cobalt_mpu_bench::config::{endpoint_uri, load_sdk_config};
use cobalt_mpu_bench::data::RandomData;
use cobalt_mpu_bench::sink::{JsonLinesSink, ResultSink, TracingSink};
use cobalt_mpu_bench::size::UploadConfig;
use cobalt_mpu_bench::storage::memory::MemoryStorage;
use cobalt_mpu_bench::storage::{MultipartStorage, S3Storage};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;

mod cli;

use cli::Args;

/// Upper bound on the pre-generated payload block.
const MAX_DATA_BLOCK: u64 = 64 * MIB;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();
    let config =
        UploadConfig::resolve(&args.upload_spec()).context("Invalid upload configuration")?;
    tracing::info!(
        object_size = config.object_size(),
        part_size = config.part_size(),
        parts_count = config.parts_count(),
        concurrency = config.concurrency(),
        "Resolved upload configuration"
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling uploads");
            interrupt.cancel();
        }
    });

    let sink: Arc<Box<dyn ResultSink>> = Arc::new(match &args.results {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open results file {}", path.display()))?;
            Box::new(JsonLinesSink::new(BufWriter::new(file)))
        }
        None => Box::new(TracingSink),
    });

    let totals = if args.dry_run {
        run(&args, config, Arc::new(MemoryStorage::default()), sink, cancel).await?
    } else {
        let target = args
            .target
            .as_ref()
            .context("A target is required unless --dry-run is given")?;
        let endpoint = endpoint_uri(args.endpoint.as_deref())?;
        let shared_config = load_sdk_config(endpoint.as_ref(), args.region.clone()).await;
        let storage = S3Storage::from_conf(&shared_config, target.bucket(), endpoint.is_some());
        run(&args, config, Arc::new(storage), sink, cancel).await?
    };

    tracing::info!(
        attempted = totals.attempted,
        completed = totals.completed,
        failed = totals.failed,
        cancelled = totals.cancelled,
        "Run totals"
    );
    Ok(())
}

async fn run<S: MultipartStorage>(
    args: &Args,
    config: UploadConfig,
    storage: Arc<S>,
    sink: Arc<Box<dyn ResultSink>>,
    cancel: CancellationToken,
) -> Result<RunTotals> {
    let block_len = usize::try_from(config.part_size().min(MAX_DATA_BLOCK))
        .context("Payload block does not fit in memory")?;

    let totals = Benchmark::builder()
        .storage(storage)
        .data(RandomData::new(args.seed, block_len))
        .config(config)
        .sink(sink)
        .prefix(args.prefix())
        .object_concurrency(args.object_concurrency.get())
        .stop(args.stop_condition())
        .seed(args.seed)
        .cancel(cancel)
        .build()
        .run()
        .await;
    Ok(totals)
}
