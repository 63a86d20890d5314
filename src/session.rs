//! State of a single multipart upload attempt.

use derive_more::Display;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::plan::PartDescriptor;
use crate::storage::StorageError;
use crate::types::{CompletedPart, ETag, UploadId};

/// Lifecycle of an [UploadSession].
///
/// ```text
/// Initiating -> InProgress -> Completing -> Completed
///     |              |             |
///     v              v             v
///   Failed        Aborting      Failed
///                    |
///                    v
///                 Aborted
/// ```
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Initiating,
    InProgress,
    Completing,
    Completed,
    Aborting,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Aborted | SessionState::Failed
        )
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Initiating, InProgress)
                | (Initiating, Failed)
                | (InProgress, Completing)
                | (InProgress, Aborting)
                | (Completing, Completed)
                | (Completing, Failed)
                | (Aborting, Aborted)
        )
    }
}

/// Why a single part was not uploaded.
#[derive(Debug, Error)]
pub enum PartUploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Part upload was cancelled")]
    Cancelled,
}

/// Outcome of uploading one part.
#[derive(Debug)]
pub struct PartResult {
    part: PartDescriptor,
    outcome: Result<ETag, PartUploadError>,
}

impl PartResult {
    pub fn new(part: PartDescriptor, outcome: Result<ETag, PartUploadError>) -> Self {
        PartResult { part, outcome }
    }

    pub fn index(&self) -> u32 {
        self.part.index()
    }

    pub fn part(&self) -> &PartDescriptor {
        &self.part
    }

    pub fn e_tag(&self) -> Option<&ETag> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&PartUploadError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Err(PartUploadError::Cancelled))
    }
}

/// Mutable state of one multipart upload attempt.
///
/// A session belongs to exactly one attempt. Part results are keyed by part
/// number, so the order in which they are recorded does not matter.
#[derive(Debug)]
pub struct UploadSession {
    key: String,
    upload_id: Option<UploadId>,
    parts: BTreeMap<u32, PartResult>,
    state: SessionState,
}

impl UploadSession {
    pub fn new(key: impl Into<String>) -> Self {
        UploadSession {
            key: key.into(),
            upload_id: None,
            parts: BTreeMap::new(),
            state: SessionState::Initiating,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The id issued by the storage service, once initiated.
    pub fn upload_id(&self) -> Option<&UploadId> {
        self.upload_id.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Record the issued upload id and move to [SessionState::InProgress].
    pub fn begin(&mut self, upload_id: UploadId) {
        self.upload_id = Some(upload_id);
        self.advance(SessionState::InProgress);
    }

    pub fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid session transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(key = %self.key, from = %self.state, to = %next, "Session state change");
        self.state = next;
    }

    pub fn record(&mut self, result: PartResult) {
        self.parts.insert(result.index(), result);
    }

    /// Recorded results in ascending part order.
    pub fn parts(&self) -> impl Iterator<Item = &PartResult> {
        self.parts.values()
    }

    pub fn all_succeeded(&self) -> bool {
        self.parts.values().all(PartResult::is_success)
    }

    /// The `(part, etag)` pairs of every successful part, sorted by part number.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.parts
            .values()
            .filter_map(|result| {
                result.e_tag().map(|e_tag| CompletedPart {
                    index: result.index(),
                    e_tag: e_tag.clone(),
                })
            })
            .collect()
    }

    /// Bytes of all successfully uploaded parts.
    pub fn bytes_uploaded(&self) -> u64 {
        self.parts
            .values()
            .filter(|result| result.is_success())
            .map(|result| result.part().length())
            .sum()
    }

    /// Remove and return the failure which caused the upload to abort.
    ///
    /// This is the lowest numbered part that failed for a reason other than
    /// cancellation, falling back to the lowest numbered cancelled part.
    pub fn take_primary_failure(&mut self) -> Option<(u32, PartUploadError)> {
        let index = self
            .parts
            .values()
            .find(|result| result.error().is_some() && !result.is_cancelled())
            .or_else(|| self.parts.values().find(|result| result.is_cancelled()))
            .map(PartResult::index)?;
        let result = self.parts.remove(&index)?;
        result.outcome.err().map(|error| (index, error))
    }
}
