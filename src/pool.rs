//! Bounded concurrent upload of the parts of one object.

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use typed_builder::TypedBuilder;

use crate::data::DataGenerator;
use crate::plan::PartDescriptor;
use crate::session::{PartResult, PartUploadError, UploadSession};
use crate::storage::{MultipartStorage, StorageError};
use crate::types::{ETag, UploadId};

/// Uploads the parts of a session with at most `concurrency` requests in flight.
///
/// Parts are started in ascending order. A failing part does not stop the
/// others; every part ends up with a [PartResult] in the session.
#[derive(TypedBuilder)]
pub struct PartUploadPool<'a, S, D> {
    storage: &'a S,
    data: &'a D,
    key: &'a str,
    concurrency: usize,
    cancel: &'a CancellationToken,
}

impl<S, D> PartUploadPool<'_, S, D>
where
    S: MultipartStorage,
    D: DataGenerator,
{
    /// Upload `parts`, returning only once each of them has a result.
    #[instrument(skip_all, fields(key = self.key, parts = parts.len()))]
    pub async fn run(&self, session: &mut UploadSession, parts: Vec<PartDescriptor>) {
        let Some(upload_id) = session.upload_id().cloned() else {
            for part in parts {
                session.record(PartResult::new(
                    part,
                    Err(StorageError::MissingUploadId.into()),
                ));
            }
            return;
        };

        stream::iter(parts)
            .map(|part| {
                let upload_id = &upload_id;
                async move { PartResult::new(part, self.upload(upload_id, part).await) }
            })
            .buffer_unordered(self.concurrency.max(1))
            .for_each(|result| {
                if let Some(error) = result.error() {
                    tracing::debug!(part = result.index(), error = %error, "Part failed");
                }
                session.record(result);
                futures::future::ready(())
            })
            .await;
    }

    async fn upload(
        &self,
        upload_id: &UploadId,
        part: PartDescriptor,
    ) -> Result<ETag, PartUploadError> {
        if self.cancel.is_cancelled() {
            return Err(PartUploadError::Cancelled);
        }
        let payload = self.data.read(part.offset(), part.length());
        tracing::trace!(%part, "Uploading");

        tokio::select! {
            result = self.storage.upload_part(self.key, upload_id, &part, payload) => {
                Ok(result?)
            }
            _ = self.cancel.cancelled() => Err(PartUploadError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RandomData;
    use crate::plan::plan;
    use crate::size::{UploadConfig, UploadSpec};
    use crate::storage::memory::{Faults, MemoryStorage};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn parts(count: i64) -> Vec<PartDescriptor> {
        let spec = UploadSpec::builder()
            .part_size(Some("16".into()))
            .parts_count(Some(count))
            .concurrency(1)
            .build();
        plan(&UploadConfig::resolve(&spec).unwrap())
    }

    async fn session(storage: &MemoryStorage) -> UploadSession {
        let mut session = UploadSession::new("key");
        session.begin(storage.initiate_multipart_upload("key").await.unwrap());
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let storage = MemoryStorage::builder()
            .latency(Duration::from_millis(10))
            .build();
        let data = RandomData::new(0, 16);
        let cancel = CancellationToken::new();
        let mut session = session(&storage).await;

        PartUploadPool::builder()
            .storage(&storage)
            .data(&data)
            .key("key")
            .concurrency(3)
            .cancel(&cancel)
            .build()
            .run(&mut session, parts(10))
            .await;

        assert_eq!(storage.calls().upload_part, 10);
        assert_eq!(storage.max_in_flight(), 3);
        assert!(session.all_succeeded());
        assert_eq!(session.completed_parts().len(), 10);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_parts() {
        let storage = MemoryStorage::builder()
            .faults(Faults::builder().parts([2, 4].into()).build())
            .build();
        let data = RandomData::new(0, 16);
        let cancel = CancellationToken::new();
        let mut session = session(&storage).await;

        PartUploadPool::builder()
            .storage(&storage)
            .data(&data)
            .key("key")
            .concurrency(2)
            .cancel(&cancel)
            .build()
            .run(&mut session, parts(6))
            .await;

        assert_eq!(storage.calls().upload_part, 6);
        let failed: Vec<_> = session
            .parts()
            .filter(|result| !result.is_success())
            .map(PartResult::index)
            .collect();
        assert_eq!(failed, vec![2, 4]);
        assert_eq!(session.bytes_uploaded(), 64);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let storage = MemoryStorage::default();
        let data = RandomData::new(0, 16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = session(&storage).await;

        PartUploadPool::builder()
            .storage(&storage)
            .data(&data)
            .key("key")
            .concurrency(4)
            .cancel(&cancel)
            .build()
            .run(&mut session, parts(4))
            .await;

        assert_eq!(storage.calls().upload_part, 0);
        assert_eq!(session.parts().count(), 4);
        assert!(session
            .parts()
            .all(|result| matches!(result.error(), Some(PartUploadError::Cancelled))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_in_flight_parts() {
        let storage = MemoryStorage::builder()
            .latency(Duration::from_secs(60))
            .build();
        let data = RandomData::new(0, 16);
        let cancel = CancellationToken::new();
        let mut session = session(&storage).await;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        PartUploadPool::builder()
            .storage(&storage)
            .data(&data)
            .key("key")
            .concurrency(2)
            .cancel(&cancel)
            .build()
            .run(&mut session, parts(4))
            .await;

        assert_eq!(storage.calls().upload_part, 2);
        assert_eq!(session.parts().count(), 4);
        assert!(!session.parts().any(PartResult::is_success));
    }

    #[tokio::test]
    async fn test_missing_upload_id() {
        let storage = MemoryStorage::default();
        let data = RandomData::new(0, 16);
        let cancel = CancellationToken::new();
        let mut session = UploadSession::new("key");

        PartUploadPool::builder()
            .storage(&storage)
            .data(&data)
            .key("key")
            .concurrency(1)
            .cancel(&cancel)
            .build()
            .run(&mut session, parts(2))
            .await;

        assert_eq!(storage.calls().upload_part, 0);
        assert_matches!(
            session.take_primary_failure(),
            Some((1, PartUploadError::Storage(StorageError::MissingUploadId)))
        );
    }
}
