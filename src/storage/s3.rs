use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use bytes::Bytes;
use tracing::instrument;

use super::{MultipartStorage, StorageError};
use crate::plan::PartDescriptor;
use crate::types::{CompletedPart, ETag, UploadId};

/// [MultipartStorage] backed by an S3 bucket.
///
/// # Example
///
/// ```no_run
/// use cobalt_mpu_bench::config::load_sdk_config;
/// use cobalt_mpu_bench::storage::S3Storage;
///
/// # tokio_test::block_on(async {
/// let shared_config = load_sdk_config(None, None).await;
/// let storage = S3Storage::from_conf(&shared_config, "my-bucket", false);
/// # })
/// ```
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        S3Storage {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create the client from a shared config. Custom endpoints such as
    /// LocalStack or MinIO usually need `force_path_style`.
    pub fn from_conf(
        shared_config: &SdkConfig,
        bucket: impl Into<String>,
        force_path_style: bool,
    ) -> Self {
        let conf = Builder::from(shared_config)
            .force_path_style(force_path_style)
            .build();
        S3Storage::new(Client::from_conf(conf), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn part_number(index: u32) -> Result<i32, StorageError> {
        i32::try_from(index).map_err(|_| StorageError::PartNumber(index))
    }
}

#[async_trait]
impl MultipartStorage for S3Storage {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn initiate_multipart_upload(&self, key: &str) -> Result<UploadId, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;

        response
            .upload_id()
            .map(UploadId::from)
            .ok_or(StorageError::MissingUploadId)
    }

    #[instrument(skip(self, payload), fields(bucket = %self.bucket, part = part.index()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part: &PartDescriptor,
        payload: Bytes,
    ) -> Result<ETag, StorageError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .part_number(Self::part_number(part.index())?)
            .body(ByteStream::from(payload))
            .send()
            .await?;

        response
            .e_tag()
            .map(ETag::from)
            .ok_or(StorageError::MissingETag(part.index()))
    }

    #[instrument(skip(self, parts), fields(bucket = %self.bucket, parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let parts = parts
            .iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .e_tag(part.e_tag.as_str())
                    .part_number(Self::part_number(part.index)?)
                    .build())
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .multipart_upload(completed_multipart_upload)
            .send()
            .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{endpoint_uri, load_sdk_config};
    use crate::plan::plan;
    use crate::size::{UploadConfig, UploadSpec};
    use serial_test::serial;

    #[test]
    fn test_part_number_range() {
        assert_eq!(S3Storage::part_number(10_000).unwrap(), 10_000);
        assert!(matches!(
            S3Storage::part_number(u32::MAX),
            Err(StorageError::PartNumber(u32::MAX))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_from_conf() {
        let shared_config = load_sdk_config(None, Some("ap-southeast-2".into())).await;
        let storage = S3Storage::from_conf(&shared_config, "bench-bucket", true);
        assert_eq!(storage.bucket(), "bench-bucket");
    }

    // *** Integration tests *** //
    // Requires a LocalStack (or other S3 compatible) endpoint with an existing
    // `test-multipart-bucket`, e.g. `LOCALSTACK_HOSTNAME=localhost`.
    #[tokio::test]
    #[serial]
    #[ignore = "requires a running LocalStack"]
    async fn test_multipart_round_trip() {
        let endpoint = endpoint_uri(None).unwrap();
        let shared_config = load_sdk_config(endpoint.as_ref(), Some("ap-southeast-2".into())).await;
        let storage = S3Storage::from_conf(&shared_config, "test-multipart-bucket", true);

        let spec = UploadSpec::builder()
            .part_size(Some("5MiB".into()))
            .parts_count(Some(2))
            .concurrency(1)
            .build();
        let config = UploadConfig::resolve(&spec).unwrap();
        let key = "mpu-bench/round-trip";

        let upload_id = storage.initiate_multipart_upload(key).await.unwrap();
        let mut completed = vec![];
        for part in plan(&config) {
            let payload = Bytes::from(vec![0_u8; part.length() as usize]);
            let e_tag = storage
                .upload_part(key, &upload_id, &part, payload)
                .await
                .unwrap();
            completed.push(CompletedPart {
                index: part.index(),
                e_tag,
            });
        }
        storage
            .complete_multipart_upload(key, &upload_id, &completed)
            .await
            .unwrap();
    }
}
