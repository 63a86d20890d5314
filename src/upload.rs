//! Multipart upload of a single object, from initiation to completion or abort.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use typed_builder::TypedBuilder;

use crate::data::DataGenerator;
use crate::plan::plan;
use crate::pool::PartUploadPool;
use crate::session::{PartUploadError, SessionState, UploadSession};
use crate::size::UploadConfig;
use crate::storage::{MultipartStorage, StorageError};

/// Why an object upload attempt did not complete.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to initiate multipart upload")]
    Initiate(#[source] StorageError),
    #[error("Failed to upload part {part}")]
    Part {
        part: u32,
        #[source]
        source: PartUploadError,
    },
    #[error("Failed to complete multipart upload")]
    Complete(#[source] StorageError),
    #[error("Upload was cancelled")]
    Cancelled,
}

/// Terminal outcome of one [ObjectUpload].
#[derive(Debug)]
pub struct UploadReport {
    pub key: String,
    pub object_size: u64,
    /// Bytes of the parts which were accepted by the storage service.
    pub bytes_uploaded: u64,
    pub start: SystemTime,
    pub end: SystemTime,
    pub elapsed: Duration,
    pub state: SessionState,
    pub error: Option<UploadError>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(UploadError::Cancelled))
    }
}

/// A one-shot multipart upload of a single object.
///
/// # Example
///
/// ```
/// use cobalt_mpu_bench::data::RandomData;
/// use cobalt_mpu_bench::size::{UploadConfig, UploadSpec};
/// use cobalt_mpu_bench::storage::memory::MemoryStorage;
/// use cobalt_mpu_bench::upload::ObjectUpload;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let spec = UploadSpec::builder()
///     .object_size(Some("20MiB".into()))
///     .part_size(Some("5MiB".into()))
///     .concurrency(4)
///     .build();
/// let config = UploadConfig::resolve(&spec).unwrap();
/// let storage = Arc::new(MemoryStorage::builder().record_objects(true).build());
///
/// let report = ObjectUpload::builder()
///     .storage(storage.clone())
///     .data(RandomData::new(0, 1024))
///     .config(config)
///     .key("bench/object")
///     .build()
///     .run()
///     .await;
/// assert!(report.is_success());
/// assert_eq!(storage.object_size("bench/object"), Some(20 * 1024 * 1024));
/// # })
/// ```
#[derive(TypedBuilder)]
pub struct ObjectUpload<S, D> {
    storage: Arc<S>,
    data: D,
    config: UploadConfig,
    #[builder(setter(into))]
    key: String,
    #[builder(default)]
    cancel: CancellationToken,
}

impl<S, D> ObjectUpload<S, D>
where
    S: MultipartStorage,
    D: DataGenerator,
{
    #[instrument(skip_all, fields(key = %self.key, object_size = self.config.object_size()))]
    pub async fn run(self) -> UploadReport {
        let start = SystemTime::now();
        let timer = Instant::now();
        let mut session = UploadSession::new(self.key.clone());

        let error = self.drive(&mut session).await;

        let report = UploadReport {
            key: self.key,
            object_size: self.config.object_size(),
            bytes_uploaded: session.bytes_uploaded(),
            start,
            end: SystemTime::now(),
            elapsed: timer.elapsed(),
            state: session.state(),
            error,
        };
        match &report.error {
            None => tracing::info!(elapsed = ?report.elapsed, "Upload completed"),
            Some(UploadError::Cancelled) => tracing::info!(state = %report.state, "Upload cancelled"),
            Some(error) => tracing::warn!(state = %report.state, error = %error, "Upload failed"),
        }
        report
    }

    async fn drive(&self, session: &mut UploadSession) -> Option<UploadError> {
        if self.cancel.is_cancelled() {
            session.advance(SessionState::Failed);
            return Some(UploadError::Cancelled);
        }

        match self.storage.initiate_multipart_upload(&self.key).await {
            Ok(upload_id) => session.begin(upload_id),
            Err(e) => {
                session.advance(SessionState::Failed);
                return Some(UploadError::Initiate(e));
            }
        }

        PartUploadPool::builder()
            .storage(self.storage.as_ref())
            .data(&self.data)
            .key(&self.key)
            .concurrency(self.config.concurrency())
            .cancel(&self.cancel)
            .build()
            .run(session, plan(&self.config))
            .await;

        if !session.all_succeeded() || self.cancel.is_cancelled() {
            session.advance(SessionState::Aborting);
            self.abort(session).await;
            session.advance(SessionState::Aborted);

            return Some(match session.take_primary_failure() {
                Some((part, source @ PartUploadError::Storage(_))) => {
                    UploadError::Part { part, source }
                }
                _ => UploadError::Cancelled,
            });
        }

        session.advance(SessionState::Completing);
        let parts = session.completed_parts();
        let result = match session.upload_id() {
            Some(upload_id) => {
                self.storage
                    .complete_multipart_upload(&self.key, upload_id, &parts)
                    .await
            }
            None => Err(StorageError::MissingUploadId),
        };
        match result {
            Ok(()) => {
                session.advance(SessionState::Completed);
                None
            }
            Err(e) => {
                self.abort(session).await;
                session.advance(SessionState::Failed);
                Some(UploadError::Complete(e))
            }
        }
    }

    /// Best effort release of the server side upload. Failures are logged only.
    async fn abort(&self, session: &UploadSession) {
        let Some(upload_id) = session.upload_id() else {
            return;
        };
        if let Err(e) = self
            .storage
            .abort_multipart_upload(&self.key, upload_id)
            .await
        {
            tracing::warn!(upload_id = %upload_id, error = %e, "Failed to abort multipart upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RandomData;
    use crate::size::UploadSpec;
    use crate::storage::memory::{Faults, MemoryStorage};
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn config(parts: i64, concurrency: i64) -> UploadConfig {
        let spec = UploadSpec::builder()
            .part_size(Some("32".into()))
            .parts_count(Some(parts))
            .concurrency(concurrency)
            .build();
        UploadConfig::resolve(&spec).unwrap()
    }

    async fn upload(storage: &Arc<MemoryStorage>, config: UploadConfig) -> UploadReport {
        ObjectUpload::builder()
            .storage(storage.clone())
            .data(RandomData::new(1, 32))
            .config(config)
            .key("bench/object")
            .build()
            .run()
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_with_sorted_parts() {
        // Later parts finish first.
        let part_latency: HashMap<u32, Duration> = (1..=8)
            .map(|index| (index, Duration::from_millis(100 - 10 * index as u64)))
            .collect();
        let storage = Arc::new(
            MemoryStorage::builder()
                .part_latency(part_latency)
                .record_objects(true)
                .build(),
        );

        let report = upload(&storage, config(8, 8)).await;

        assert!(report.is_success());
        assert_matches!(report.error, None);
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.bytes_uploaded, 256);
        assert_eq!(storage.completions(), vec![(1..=8).collect::<Vec<u32>>()]);
        assert_eq!(storage.object_size("bench/object"), Some(256));
        assert_eq!(storage.calls().abort, 0);
        assert_eq!(storage.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_part_failure_aborts_once() {
        let storage = Arc::new(
            MemoryStorage::builder()
                .faults(Faults::builder().parts([3, 5].into()).build())
                .build(),
        );

        let report = upload(&storage, config(6, 2)).await;

        assert!(!report.is_success());
        assert_eq!(report.state, SessionState::Aborted);
        assert_matches!(
            report.error,
            Some(UploadError::Part {
                part: 3,
                source: PartUploadError::Storage(StorageError::Rejected(_))
            })
        );
        let calls = storage.calls();
        assert_eq!(calls.upload_part, 6);
        assert_eq!(calls.complete, 0);
        assert_eq!(calls.abort, 1);
        assert_eq!(storage.open_uploads(), 0);
        assert_eq!(storage.objects(), 0);
    }

    #[tokio::test]
    async fn test_initiate_failure() {
        let storage = Arc::new(
            MemoryStorage::builder()
                .faults(Faults::builder().initiate(true).build())
                .build(),
        );

        let report = upload(&storage, config(2, 1)).await;

        assert_eq!(report.state, SessionState::Failed);
        assert_matches!(report.error, Some(UploadError::Initiate(_)));
        let calls = storage.calls();
        assert_eq!(calls.upload_part, 0);
        assert_eq!(calls.abort, 0);
    }

    #[tokio::test]
    async fn test_complete_failure_is_cleaned_up() {
        let storage = Arc::new(
            MemoryStorage::builder()
                .faults(Faults::builder().complete(true).build())
                .build(),
        );

        let report = upload(&storage, config(3, 3)).await;

        assert_eq!(report.state, SessionState::Failed);
        assert_matches!(report.error, Some(UploadError::Complete(_)));
        assert_eq!(storage.calls().complete, 1);
        assert_eq!(storage.calls().abort, 1);
        assert_eq!(storage.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_abort_failure_keeps_part_error() {
        let storage = Arc::new(
            MemoryStorage::builder()
                .faults(
                    Faults::builder()
                        .parts([1].into())
                        .abort(true)
                        .build(),
                )
                .build(),
        );

        let report = upload(&storage, config(2, 1)).await;

        assert_eq!(report.state, SessionState::Aborted);
        assert_matches!(report.error, Some(UploadError::Part { part: 1, .. }));
        assert_eq!(storage.calls().abort, 1);
        assert_eq!(storage.open_uploads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_upload_aborts() {
        let storage = Arc::new(
            MemoryStorage::builder()
                .latency(Duration::from_secs(30))
                .build(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = ObjectUpload::builder()
            .storage(storage.clone())
            .data(RandomData::new(1, 32))
            .config(config(4, 2))
            .key("bench/object")
            .cancel(cancel)
            .build()
            .run()
            .await;

        assert!(report.is_cancelled());
        assert_eq!(report.state, SessionState::Aborted);
        assert_eq!(storage.calls().abort, 1);
        assert_eq!(storage.calls().complete, 0);
        assert_eq!(storage.open_uploads(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_initiate() {
        let storage = Arc::new(MemoryStorage::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = ObjectUpload::builder()
            .storage(storage.clone())
            .data(RandomData::new(1, 32))
            .config(config(2, 1))
            .key("bench/object")
            .cancel(cancel)
            .build()
            .run()
            .await;

        assert!(report.is_cancelled());
        assert_eq!(report.state, SessionState::Failed);
        assert_eq!(storage.calls().initiate, 0);
    }
}
