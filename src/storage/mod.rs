//! The storage service operations a multipart benchmark depends on.
//!
//! [MultipartStorage] is implemented for S3 by [S3Storage], and in memory by
//! [memory::MemoryStorage] for dry runs and tests. Retries, signing and endpoint
//! routing are properties of the underlying client, not of this crate.

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use std::error::Error as StdError;
use thiserror::Error;

use crate::plan::PartDescriptor;
use crate::types::{CompletedPart, ETag, UploadId};

pub mod memory;
mod s3;

pub use s3::S3Storage;

/// Errors returned by a [MultipartStorage] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Missing multipart upload id")]
    MissingUploadId,
    #[error("Missing ETag for part {0}")]
    MissingETag(u32),
    #[error("Part number {0} is out of range")]
    PartNumber(u32),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Service(Box<dyn StdError + Send + Sync>),
}

impl<E: StdError + Send + Sync + 'static> From<SdkError<E>> for StorageError {
    fn from(value: SdkError<E>) -> Self {
        Self::Service(Box::new(value))
    }
}

/// The multipart upload API of an object store.
#[async_trait]
pub trait MultipartStorage: Send + Sync + 'static {
    /// Open a multipart upload for `key`.
    async fn initiate_multipart_upload(&self, key: &str) -> Result<UploadId, StorageError>;

    /// Upload one part of an open multipart upload.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part: &PartDescriptor,
        payload: Bytes,
    ) -> Result<ETag, StorageError>;

    /// Stitch the uploaded parts together. `parts` is sorted by index.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    /// Discard an open multipart upload and release its parts.
    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), StorageError>;
}
