use clap::Parser;
use cobalt_mpu_bench::bench::StopCondition;
use cobalt_mpu_bench::size::{UploadSpec, DEFAULT_PART_CONCURRENCY};
use cobalt_mpu_bench::target::BenchTarget;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Benchmark S3 multipart uploads.
///
/// The object layout is given by exactly two of `--obj.size`, `--part.size`
/// and `--parts`.
#[derive(Debug, Parser)]
#[command(name = "mpu-bench", version)]
pub struct Args {
    /// Bucket and key prefix to upload to, e.g. `s3://bucket/prefix`.
    #[arg(long, env = "MPU_BENCH_TARGET", required_unless_present = "dry_run")]
    pub target: Option<BenchTarget>,

    /// Size of each object, e.g. `64MiB`.
    #[arg(long = "obj.size", env = "MPU_BENCH_OBJ_SIZE")]
    pub object_size: Option<String>,

    /// Size of each part, e.g. `5MiB`.
    #[arg(long = "part.size", env = "MPU_BENCH_PART_SIZE")]
    pub part_size: Option<String>,

    /// Number of parts per object.
    #[arg(long = "parts", env = "MPU_BENCH_PARTS")]
    pub parts_count: Option<i64>,

    /// Parts of one object uploaded at the same time.
    #[arg(long = "part.concurrent", env = "MPU_BENCH_PART_CONCURRENT", default_value_t = DEFAULT_PART_CONCURRENCY)]
    pub part_concurrency: i64,

    /// Objects uploaded at the same time.
    #[arg(long = "concurrent", env = "MPU_BENCH_CONCURRENT", default_value = "20")]
    pub object_concurrency: NonZeroUsize,

    /// Benchmark duration in seconds, `0` to run until interrupted.
    #[arg(long, env = "MPU_BENCH_DURATION", default_value_t = 300)]
    pub duration: u64,

    /// Stop after this many objects.
    #[arg(long, env = "MPU_BENCH_OBJECTS")]
    pub objects: Option<u64>,

    /// Use single part uploads. Not supported, this tool only measures multipart uploads.
    #[arg(long)]
    pub disable_multipart: bool,

    /// Custom S3 endpoint, e.g. a MinIO server. Implies path style addressing.
    #[arg(long, env = "MPU_BENCH_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "MPU_BENCH_REGION")]
    pub region: Option<String>,

    /// Append per-object results to this file as JSON lines instead of logging them.
    #[arg(long, env = "MPU_BENCH_RESULTS")]
    pub results: Option<PathBuf>,

    /// Seed for object keys and payloads.
    #[arg(long, env = "MPU_BENCH_SEED", default_value_t = 0)]
    pub seed: u64,

    /// Upload to an in-memory store instead of S3.
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    pub fn upload_spec(&self) -> UploadSpec {
        UploadSpec::builder()
            .object_size(self.object_size.clone())
            .part_size(self.part_size.clone())
            .parts_count(self.parts_count)
            .concurrency(self.part_concurrency)
            .disable_multipart(self.disable_multipart)
            .build()
    }

    pub fn stop_condition(&self) -> StopCondition {
        StopCondition {
            duration: (self.duration > 0).then_some(Duration::from_secs(self.duration)),
            max_objects: self.objects,
        }
    }

    /// The key prefix for uploaded objects.
    pub fn prefix(&self) -> &str {
        self.target.as_ref().map_or("mpu-bench", BenchTarget::prefix)
    }
}
