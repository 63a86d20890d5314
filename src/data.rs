//! Payload generation for uploaded parts.

use bytes::{Bytes, BytesMut};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;

/// Source of the bytes uploaded for each part of an object.
pub trait DataGenerator: Send + Sync + 'static {
    /// The `length` bytes found at `offset` of the object.
    fn read(&self, offset: u64, length: u64) -> Bytes;

    /// A generator with fresh content, used for the next object attempt.
    fn regenerate(&self, seed: u64) -> Self
    where
        Self: Sized;
}

/// Seeded pseudo-random payloads.
///
/// A single block of random bytes is generated up front; reads cycle through
/// that block starting at `offset % block_len`, so a part read costs at most
/// one copy. The same seed always yields the same content.
#[derive(Clone)]
pub struct RandomData {
    block: Bytes,
}

impl RandomData {
    /// Generate a block of `block_len` random bytes (at least one).
    pub fn new(seed: u64, block_len: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut block = vec![0_u8; block_len.max(1)];
        rng.fill_bytes(&mut block);
        RandomData {
            block: Bytes::from(block),
        }
    }

    pub fn block_len(&self) -> usize {
        self.block.len()
    }
}

impl fmt::Debug for RandomData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomData")
            .field("block_len", &self.block.len())
            .finish()
    }
}

impl DataGenerator for RandomData {
    fn read(&self, offset: u64, length: u64) -> Bytes {
        let block_len = self.block.len();
        let length = length as usize;
        let start = (offset % block_len as u64) as usize;

        if start + length <= block_len {
            return self.block.slice(start..start + length);
        }

        let mut buffer = BytesMut::with_capacity(length);
        let mut position = start;
        while buffer.len() < length {
            let take = (length - buffer.len()).min(block_len - position);
            buffer.extend_from_slice(&self.block[position..position + take]);
            position = (position + take) % block_len;
        }
        buffer.freeze()
    }

    fn regenerate(&self, seed: u64) -> Self {
        RandomData::new(seed, self.block.len())
    }
}
