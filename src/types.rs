//! Opaque tokens issued by the storage service.

use derive_more::{Display, From, Into};
use serde::Serialize;

/// Identifies an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize)]
pub struct UploadId(String);

impl UploadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UploadId {
    fn from(value: &str) -> Self {
        UploadId(value.to_owned())
    }
}

/// Content identity of an uploaded part, required verbatim on completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize)]
pub struct ETag(String);

impl ETag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ETag {
    fn from(value: &str) -> Self {
        ETag(value.to_owned())
    }
}

/// A part reference presented when completing a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedPart {
    /// The 1-based part number.
    pub index: u32,
    pub e_tag: ETag,
}
