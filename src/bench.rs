//! The benchmark driver: repeated object uploads with a run-wide concurrency bound.

use futures::future;
use futures::stream::{self, StreamExt};
use rand::distributions::{Alphanumeric, DistString};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use typed_builder::TypedBuilder;

use crate::data::DataGenerator;
use crate::sink::{ObjectRecord, ResultSink};
use crate::size::UploadConfig;
use crate::storage::MultipartStorage;
use crate::upload::{ObjectUpload, UploadReport};

/// When a [Benchmark] stops starting new objects.
///
/// With neither limit set the run continues until cancelled.
#[derive(Debug, Default, Clone, Copy, TypedBuilder)]
pub struct StopCondition {
    /// Wall clock budget. Uploads still running when it elapses are cancelled.
    #[builder(default, setter(strip_option))]
    pub duration: Option<Duration>,
    /// Number of object upload attempts to start.
    #[builder(default, setter(strip_option))]
    pub max_objects: Option<u64>,
}

/// Outcome counts of a benchmark run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub attempted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl RunTotals {
    fn add(&mut self, report: &UploadReport) {
        self.attempted += 1;
        if report.is_success() {
            self.completed += 1;
        } else if report.is_cancelled() {
            self.cancelled += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Uploads fresh objects until the [StopCondition] is met, with at most
/// `object_concurrency` objects in flight at once.
///
/// Each object is partitioned by the same [UploadConfig] and uploaded with its
/// own part concurrency. Every finished attempt is sent to the sink, except for
/// attempts that were cancelled.
#[derive(TypedBuilder)]
pub struct Benchmark<S, D, K> {
    storage: Arc<S>,
    /// Template for the payload of every object, see [DataGenerator::regenerate].
    #[builder(setter(transform = |data: D| Arc::new(data)))]
    data: Arc<D>,
    config: UploadConfig,
    sink: Arc<K>,
    /// Key prefix for uploaded objects.
    #[builder(default, setter(into))]
    prefix: String,
    #[builder(default = 1)]
    object_concurrency: usize,
    #[builder(default)]
    stop: StopCondition,
    /// Seeds object keys and payloads.
    #[builder(default)]
    seed: u64,
    #[builder(default)]
    cancel: CancellationToken,
}

impl<S, D, K> Benchmark<S, D, K>
where
    S: MultipartStorage,
    D: DataGenerator,
    K: ResultSink,
{
    #[instrument(skip_all, fields(prefix = %self.prefix, object_concurrency = self.object_concurrency))]
    pub async fn run(self) -> RunTotals {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut totals = RunTotals::default();

        {
            let uploads = stream::iter(0..self.stop.max_objects.unwrap_or(u64::MAX))
                .take_while(|_| future::ready(!self.cancel.is_cancelled()))
                .map(|attempt| {
                    let key = object_key(&self.prefix, &mut rng);
                    let data_seed: u64 = rng.gen();
                    tracing::debug!(attempt, key = %key, "Starting object upload");

                    let template = self.data.clone();
                    let upload = ObjectUpload::builder()
                        .storage(self.storage.clone())
                        .config(self.config)
                        .key(key)
                        .cancel(self.cancel.child_token());
                    tokio::spawn(async move {
                        // Payload generation is CPU bound, keep it off the runtime threads.
                        let data =
                            tokio::task::spawn_blocking(move || template.regenerate(data_seed))
                                .await?;
                        Ok::<_, JoinError>(upload.data(data).build().run().await)
                    })
                })
                .buffer_unordered(self.object_concurrency.max(1))
                .for_each(|outcome| {
                    self.collect(&mut totals, outcome.and_then(|report| report));
                    future::ready(())
                });
            tokio::pin!(uploads);

            match self.stop.duration {
                Some(duration) => {
                    tokio::select! {
                        _ = &mut uploads => {}
                        _ = tokio::time::sleep(duration) => {
                            tracing::info!(?duration, "Benchmark duration reached, cancelling uploads");
                            self.cancel.cancel();
                            uploads.await;
                        }
                    }
                }
                None => uploads.await,
            }
        }

        if let Err(e) = self.sink.flush() {
            tracing::error!(error = %e, "Failed to flush results");
        }
        tracing::info!(?totals, "Benchmark finished");
        totals
    }

    fn collect(&self, totals: &mut RunTotals, outcome: Result<UploadReport, JoinError>) {
        match outcome {
            Ok(report) => {
                totals.add(&report);
                if !report.is_cancelled() {
                    self.sink.record(ObjectRecord::from(&report));
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Object upload task failed");
                totals.attempted += 1;
                totals.failed += 1;
            }
        }
    }
}

/// A fresh object key below `prefix`.
pub fn object_key<R: Rng>(prefix: &str, rng: &mut R) -> String {
    let name = Alphanumeric.sample_string(rng, 16);
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}
