//! # Cobalt multipart upload benchmark
//!
//! This library measures [S3 multipart uploads](https://docs.aws.amazon.com/AmazonS3/latest/userguide/mpuoverview.html)
//! by repeatedly uploading freshly generated objects with two layers of
//! bounded concurrency: objects in flight across the run, and parts in flight
//! within each object.
//!
//! The pieces compose bottom-up:
//!
//! * [size] turns object size, part size and part count inputs into a validated
//!   [size::UploadConfig].
//! * [plan] splits that config into part byte ranges.
//! * [pool] uploads the parts of one object, [upload] drives one object from
//!   initiation to completion or abort.
//! * [bench] runs uploads until a stop condition and sends each outcome to a
//!   [sink::ResultSink].
//!
//! Storage access goes through the [storage::MultipartStorage] trait, implemented
//! for S3 and for an in-memory store.
//!
//! ### About harrison.ai
//!
//! This crate is maintained by the Data Engineering team at [harrison.ai](https://harrison.ai).
//!
//! At [harrison.ai](https://harrison.ai) our mission is to create AI-as-a-medical-device solutions through
//! ventures and ultimately improve the standard of healthcare for 1 million lives every day.
//!

// Public modules

pub mod bench;
pub mod config;
pub mod data;
pub mod plan;
pub mod pool;
pub mod session;
pub mod sink;
pub mod size;
pub mod storage;
pub mod target;
pub mod types;
pub mod upload;
