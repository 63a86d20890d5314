//! Resolution of the upload geometry from raw benchmark settings.
//!
//! A multipart benchmark is described by two of object size, part size and
//! parts count; the third value is derived. [UploadConfig::resolve] selects the
//! resolution mode from the values that are present and checks every service
//! limit before any request is made.

use bytesize::{ByteSize, GIB, MIB, TIB};
use serde::Serialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

/// The minimum part size accepted by S3, set to 5 MiB.
///
/// Only the final part of an upload may be smaller than this.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// The maximum part size accepted by S3, set to 5 GiB.
pub const MAX_PART_SIZE: u64 = 5 * GIB;

/// The maximum number of parts in a single multipart upload.
pub const MAX_PARTS_COUNT: i64 = 10_000;

/// The maximum size of an S3 object, set to 5 TiB.
pub const MAX_OBJECT_SIZE: u64 = 5 * TIB;

/// Default number of parts uploaded concurrently for each object.
pub const DEFAULT_PART_CONCURRENCY: i64 = 20;

/// Errors raised while resolving an [UploadSpec].
///
/// These are detected before any network call and always prevent the
/// benchmark from starting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("multipart uploads can not be disabled for a multipart upload benchmark")]
    MultipartDisabled,
    #[error("{field} must be a single size value, got {value:?}")]
    MultiValueNotAllowed { field: &'static str, value: String },
    #[error("unable to parse {field} {value:?}: {reason}")]
    InvalidSize {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("only two of object size, part size and parts count may be given")]
    Overspecified,
    #[error("two of object size, part size and parts count must be given")]
    Underspecified,
    #[error("part size must be at least {min} bytes, part size was {part_size}")]
    TooSmallPart { part_size: u64, min: u64 },
    #[error("part size must be at most {MAX_PART_SIZE} bytes, part size was {0}")]
    TooLargePart(u64),
    #[error("object size {object_size} must be larger than part size {part_size}")]
    ObjectNotLargerThanPart { object_size: u64, part_size: u64 },
    #[error("object size {object_size} must be divisible by {divisor}")]
    NotDivisible { object_size: u64, divisor: u64 },
    #[error("at most {MAX_PARTS_COUNT} parts are allowed, parts count was {0}")]
    TooManyParts(i64),
    #[error("at least one part is required, parts count was {0}")]
    TooFewParts(i64),
    #[error("object size must be at most {MAX_OBJECT_SIZE} bytes, object size was {0}")]
    ObjectTooLarge(u64),
    #[error("part concurrency must be at least 1, part concurrency was {0}")]
    InvalidConcurrency(i64),
    #[error("part concurrency {concurrency} is too much for {parts_count} parts")]
    ConcurrencyExceedsParts { concurrency: i64, parts_count: u32 },
}

/// The raw, unvalidated settings of a multipart benchmark.
///
/// Sizes are human readable strings such as `"5MiB"`, `"64MB"` or `"5242880"`.
///
/// ```
/// use cobalt_mpu_bench::size::{UploadConfig, UploadSpec};
///
/// let spec = UploadSpec::builder()
///     .object_size(Some("20MiB".into()))
///     .part_size(Some("5MiB".into()))
///     .concurrency(4)
///     .build();
/// let config = UploadConfig::resolve(&spec).unwrap();
/// assert_eq!(config.parts_count(), 4);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct UploadSpec {
    #[builder(default)]
    object_size: Option<String>,
    #[builder(default)]
    part_size: Option<String>,
    #[builder(default)]
    parts_count: Option<i64>,
    #[builder(default = DEFAULT_PART_CONCURRENCY)]
    concurrency: i64,
    #[builder(default)]
    disable_multipart: bool,
}

/// A validated multipart upload geometry, shared by every object of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadConfig {
    object_size: u64,
    part_size: u64,
    parts_count: u32,
    concurrency: usize,
}

impl UploadConfig {
    /// Resolve an [UploadSpec], reporting the first violated limit.
    ///
    /// # Errors
    ///
    /// Checks run in a fixed order so that the same input always reports the
    /// same [ConfigError]:
    ///
    /// 1. [ConfigError::MultipartDisabled]
    /// 2. Parsing of the object size, then the part size.
    /// 3. [ConfigError::Overspecified] / [ConfigError::Underspecified].
    /// 4. The checks of the selected mode (size, count or split driven).
    /// 5. [ConfigError::ObjectTooLarge].
    /// 6. [ConfigError::InvalidConcurrency], then [ConfigError::ConcurrencyExceedsParts].
    pub fn resolve(spec: &UploadSpec) -> Result<Self, ConfigError> {
        if spec.disable_multipart {
            return Err(ConfigError::MultipartDisabled);
        }

        let object_size = spec
            .object_size
            .as_deref()
            .map(|value| parse_single_size("object size", value))
            .transpose()?;
        let part_size = spec
            .part_size
            .as_deref()
            .map(|value| parse_single_size("part size", value))
            .transpose()?;

        let (object_size, part_size, parts_count) =
            match (object_size, part_size, spec.parts_count) {
                (Some(object_size), Some(part_size), None) => size_driven(object_size, part_size)?,
                (None, Some(part_size), Some(parts_count)) => {
                    count_driven(part_size, parts_count)?
                }
                (Some(object_size), None, Some(parts_count)) => {
                    split_driven(object_size, parts_count)?
                }
                (Some(_), Some(_), Some(_)) => return Err(ConfigError::Overspecified),
                _ => return Err(ConfigError::Underspecified),
            };

        if object_size > MAX_OBJECT_SIZE {
            return Err(ConfigError::ObjectTooLarge(object_size));
        }

        if spec.concurrency < 1 {
            return Err(ConfigError::InvalidConcurrency(spec.concurrency));
        }
        if spec.concurrency > i64::from(parts_count) {
            return Err(ConfigError::ConcurrencyExceedsParts {
                concurrency: spec.concurrency,
                parts_count,
            });
        }
        let concurrency = usize::try_from(spec.concurrency)
            .map_err(|_| ConfigError::InvalidConcurrency(spec.concurrency))?;

        Ok(UploadConfig {
            object_size,
            part_size,
            parts_count,
            concurrency,
        })
    }

    /// Total size of each object, in bytes.
    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Size of every part but the last, in bytes.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Number of parts each object is split into.
    pub fn parts_count(&self) -> u32 {
        self.parts_count
    }

    /// Maximum number of part uploads in flight for a single object.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Size of the final part, in bytes.
    pub fn last_part_size(&self) -> u64 {
        self.object_size - self.part_size * u64::from(self.parts_count - 1)
    }
}

impl TryFrom<&UploadSpec> for UploadConfig {
    type Error = ConfigError;

    fn try_from(spec: &UploadSpec) -> Result<Self, Self::Error> {
        UploadConfig::resolve(spec)
    }
}

/// Parse a size which must hold exactly one magnitude.
///
/// Other benchmark modes accept ranges such as `1MiB:10MiB` or lists such as
/// `1MiB,2MiB`; a multipart benchmark needs a single deterministic size.
fn parse_single_size(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    if value.contains(|c: char| c == ':' || c == ',') {
        return Err(ConfigError::MultiValueNotAllowed {
            field,
            value: value.to_owned(),
        });
    }
    value
        .trim()
        .parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|reason| ConfigError::InvalidSize {
            field,
            value: value.to_owned(),
            reason: reason.to_string(),
        })
}

/// Object size and part size given: every part has the same size.
fn size_driven(object_size: u64, part_size: u64) -> Result<(u64, u64, u32), ConfigError> {
    if part_size < MIN_PART_SIZE {
        return Err(ConfigError::TooSmallPart {
            part_size,
            min: MIN_PART_SIZE,
        });
    }
    if part_size > MAX_PART_SIZE {
        return Err(ConfigError::TooLargePart(part_size));
    }
    if object_size <= part_size {
        return Err(ConfigError::ObjectNotLargerThanPart {
            object_size,
            part_size,
        });
    }
    if object_size % part_size != 0 {
        return Err(ConfigError::NotDivisible {
            object_size,
            divisor: part_size,
        });
    }
    let parts_count = object_size / part_size;
    if parts_count > MAX_PARTS_COUNT as u64 {
        return Err(ConfigError::TooManyParts(
            i64::try_from(parts_count).unwrap_or(i64::MAX),
        ));
    }
    Ok((object_size, part_size, parts_count as u32))
}

/// Parts count and part size given: the object size is their product.
fn count_driven(part_size: u64, parts_count: i64) -> Result<(u64, u64, u32), ConfigError> {
    let parts_count = checked_parts_count(parts_count)?;
    if part_size == 0 {
        return Err(ConfigError::TooSmallPart { part_size, min: 1 });
    }
    if part_size > MAX_PART_SIZE {
        return Err(ConfigError::TooLargePart(part_size));
    }
    Ok((part_size * u64::from(parts_count), part_size, parts_count))
}

/// Object size and parts count given: the object is split into equal parts.
fn split_driven(object_size: u64, parts_count: i64) -> Result<(u64, u64, u32), ConfigError> {
    let parts_count = checked_parts_count(parts_count)?;
    let divisor = u64::from(parts_count);
    if object_size % divisor != 0 {
        return Err(ConfigError::NotDivisible {
            object_size,
            divisor,
        });
    }
    let part_size = object_size / divisor;
    if part_size < MIN_PART_SIZE {
        return Err(ConfigError::TooSmallPart {
            part_size,
            min: MIN_PART_SIZE,
        });
    }
    if part_size > MAX_PART_SIZE {
        return Err(ConfigError::TooLargePart(part_size));
    }
    Ok((object_size, part_size, parts_count))
}

fn checked_parts_count(parts_count: i64) -> Result<u32, ConfigError> {
    if parts_count < 1 {
        return Err(ConfigError::TooFewParts(parts_count));
    }
    if parts_count > MAX_PARTS_COUNT {
        return Err(ConfigError::TooManyParts(parts_count));
    }
    Ok(parts_count as u32)
}

#[cfg(any(test, feature = "test-utils"))]
pub mod arbitrary {
    use derive_more::{AsRef, From, Into};
    use proptest::prelude::*;

    use super::{UploadConfig, UploadSpec, MAX_PARTS_COUNT, MIB, MIN_PART_SIZE};

    /// A config resolved from an object size and a part size.
    #[derive(Debug, Clone, PartialEq, Eq, AsRef, Into, From)]
    pub struct SizeDriven(UploadConfig);

    /// A config resolved from a parts count and a part size.
    #[derive(Debug, Clone, PartialEq, Eq, AsRef, Into, From)]
    pub struct CountDriven(UploadConfig);

    fn resolved(spec: UploadSpec) -> UploadConfig {
        UploadConfig::resolve(&spec).expect("generated spec must resolve")
    }

    impl Arbitrary for SizeDriven {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (MIN_PART_SIZE..=64 * MIB, 2..=MAX_PARTS_COUNT)
                .prop_flat_map(|(part_size, parts_count)| {
                    (Just(part_size), Just(parts_count), 1..=parts_count)
                })
                .prop_map(|(part_size, parts_count, concurrency)| {
                    let object_size = part_size * parts_count as u64;
                    SizeDriven(resolved(
                        UploadSpec::builder()
                            .object_size(Some(object_size.to_string()))
                            .part_size(Some(part_size.to_string()))
                            .concurrency(concurrency)
                            .build(),
                    ))
                })
                .boxed()
        }
    }

    impl Arbitrary for CountDriven {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (1..=64 * MIB, 1..=MAX_PARTS_COUNT)
                .prop_flat_map(|(part_size, parts_count)| {
                    (Just(part_size), Just(parts_count), 1..=parts_count)
                })
                .prop_map(|(part_size, parts_count, concurrency)| {
                    CountDriven(resolved(
                        UploadSpec::builder()
                            .part_size(Some(part_size.to_string()))
                            .parts_count(Some(parts_count))
                            .concurrency(concurrency)
                            .build(),
                    ))
                })
                .boxed()
        }
    }

    impl Arbitrary for UploadConfig {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                any::<SizeDriven>().prop_map(UploadConfig::from),
                any::<CountDriven>().prop_map(UploadConfig::from),
            ]
            .boxed()
        }
    }
}
