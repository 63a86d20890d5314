//! An in-memory [MultipartStorage] with fault injection and request accounting.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use typed_builder::TypedBuilder;

use super::{MultipartStorage, StorageError};
use crate::plan::PartDescriptor;
use crate::types::{CompletedPart, ETag, UploadId};

/// Which requests should fail.
#[derive(Debug, Default, Clone, TypedBuilder)]
pub struct Faults {
    #[builder(default)]
    pub initiate: bool,
    /// Part numbers whose upload fails.
    #[builder(default)]
    pub parts: HashSet<u32>,
    #[builder(default)]
    pub complete: bool,
    #[builder(default)]
    pub abort: bool,
}

/// Number of requests received, by operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub initiate: usize,
    pub upload_part: usize,
    pub complete: usize,
    pub abort: usize,
}

#[derive(Debug)]
struct OpenUpload {
    key: String,
    parts: BTreeMap<u32, (ETag, u64)>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    uploads: HashMap<UploadId, OpenUpload>,
    completed: usize,
    objects: HashMap<String, u64>,
    calls: CallCounts,
    completions: Vec<Vec<u32>>,
    max_open_uploads: usize,
}

/// Object store held in memory.
///
/// Only counters are kept for completed objects unless `record_objects` is set,
/// so long dry runs stay flat in memory.
///
/// ```
/// use cobalt_mpu_bench::storage::memory::{Faults, MemoryStorage};
///
/// let storage = MemoryStorage::builder()
///     .faults(Faults::builder().parts([2].into()).build())
///     .build();
/// assert_eq!(storage.calls().upload_part, 0);
/// ```
#[derive(Debug, Default, TypedBuilder)]
pub struct MemoryStorage {
    #[builder(default)]
    faults: Faults,
    /// Delay applied to every part upload.
    #[builder(default)]
    latency: Duration,
    /// Per-part delays, overriding `latency`.
    #[builder(default)]
    part_latency: HashMap<u32, Duration>,
    /// Keep completed object sizes and completion part lists for inspection.
    #[builder(default)]
    record_objects: bool,
    #[builder(default, setter(skip))]
    state: Mutex<State>,
    #[builder(default, setter(skip))]
    in_flight: AtomicUsize,
    #[builder(default, setter(skip))]
    max_in_flight: AtomicUsize,
}

/// Keeps the in-flight counter accurate when an upload future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStorage {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// The part numbers presented to each completion request, in request order.
    /// Empty unless `record_objects` is set.
    pub fn completions(&self) -> Vec<Vec<u32>> {
        self.state().completions.clone()
    }

    /// Size of a completed object, if `record_objects` is set.
    pub fn object_size(&self, key: &str) -> Option<u64> {
        self.state().objects.get(key).copied()
    }

    /// Number of completed objects.
    pub fn objects(&self) -> usize {
        self.state().completed
    }

    /// Multipart uploads that were neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Highest number of simultaneously open multipart uploads.
    pub fn max_open_uploads(&self) -> usize {
        self.state().max_open_uploads
    }

    /// Highest number of part uploads in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn e_tag(payload: &[u8]) -> ETag {
        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        ETag::from(format!("\"{:016x}\"", hasher.finish()))
    }
}

#[async_trait]
impl MultipartStorage for MemoryStorage {
    async fn initiate_multipart_upload(&self, key: &str) -> Result<UploadId, StorageError> {
        let mut state = self.state();
        state.calls.initiate += 1;
        if self.faults.initiate {
            return Err(StorageError::Rejected("injected initiate failure".into()));
        }
        state.next_id += 1;
        let upload_id = UploadId::from(format!("upload-{}", state.next_id));
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                key: key.to_owned(),
                parts: BTreeMap::new(),
            },
        );
        state.max_open_uploads = state.max_open_uploads.max(state.uploads.len());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &UploadId,
        part: &PartDescriptor,
        payload: Bytes,
    ) -> Result<ETag, StorageError> {
        self.state().calls.upload_part += 1;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .part_latency
            .get(&part.index())
            .copied()
            .unwrap_or(self.latency);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.faults.parts.contains(&part.index()) {
            return Err(StorageError::Rejected(format!(
                "injected failure for part {}",
                part.index()
            )));
        }
        if payload.len() as u64 != part.length() {
            return Err(StorageError::Rejected(format!(
                "part {} has {} bytes, expected {}",
                part.index(),
                payload.len(),
                part.length()
            )));
        }

        let e_tag = Self::e_tag(&payload);
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StorageError::Rejected("NoSuchUpload".into()))?;
        upload
            .parts
            .insert(part.index(), (e_tag.clone(), part.length()));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let mut state = self.state();
        state.calls.complete += 1;
        if self.record_objects {
            state
                .completions
                .push(parts.iter().map(|part| part.index).collect());
        }
        if self.faults.complete {
            return Err(StorageError::Rejected("injected complete failure".into()));
        }
        if parts.windows(2).any(|pair| pair[0].index >= pair[1].index) {
            return Err(StorageError::Rejected("InvalidPartOrder".into()));
        }

        let upload = state
            .uploads
            .get(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StorageError::Rejected("NoSuchUpload".into()))?;
        let mut size = 0;
        for part in parts {
            match upload.parts.get(&part.index) {
                Some((e_tag, length)) if *e_tag == part.e_tag => size += length,
                _ => return Err(StorageError::Rejected(format!("InvalidPart {}", part.index))),
            }
        }

        state.uploads.remove(upload_id);
        state.completed += 1;
        if self.record_objects {
            state.objects.insert(key.to_owned(), size);
        }
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), StorageError> {
        let mut state = self.state();
        state.calls.abort += 1;
        if self.faults.abort {
            return Err(StorageError::Rejected("injected abort failure".into()));
        }
        let open = state
            .uploads
            .get(upload_id)
            .is_some_and(|upload| upload.key == key);
        if !open {
            return Err(StorageError::Rejected("NoSuchUpload".into()));
        }
        state.uploads.remove(upload_id);
        Ok(())
    }
}
