//! Partitioning of an object into the parts of a multipart upload.

use derive_more::Display;
use serde::Serialize;

use crate::size::UploadConfig;

/// A contiguous byte range of an object, uploaded as one part.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[display("part {index} (offset {offset}, length {length})")]
pub struct PartDescriptor {
    index: u32,
    offset: u64,
    length: u64,
}

impl PartDescriptor {
    /// The 1-based part number.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Position of the first byte of the part within the object.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Position one past the last byte of the part.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Split an object into its ordered part descriptors.
///
/// Produces exactly [UploadConfig::parts_count] descriptors numbered from 1.
/// Every part but the last is [UploadConfig::part_size] bytes long; the last part
/// holds whatever remains of [UploadConfig::object_size]. The result depends only
/// on `config`, so a plan can be recomputed for every attempt.
///
/// ```
/// use cobalt_mpu_bench::plan::plan;
/// use cobalt_mpu_bench::size::{UploadConfig, UploadSpec};
///
/// let spec = UploadSpec::builder()
///     .object_size(Some("20MiB".into()))
///     .part_size(Some("5MiB".into()))
///     .concurrency(2)
///     .build();
/// let parts = plan(&UploadConfig::resolve(&spec).unwrap());
/// assert_eq!(parts.len(), 4);
/// assert_eq!(parts[3].offset(), 15 * 1024 * 1024);
/// ```
pub fn plan(config: &UploadConfig) -> Vec<PartDescriptor> {
    let part_size = config.part_size();
    let last = config.parts_count();

    (1..=last)
        .map(|index| {
            let offset = u64::from(index - 1) * part_size;
            let length = if index == last {
                config.object_size() - offset
            } else {
                part_size
            };
            PartDescriptor {
                index,
                offset,
                length,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::arbitrary::SizeDriven;
    use crate::size::UploadSpec;
    use bytesize::MIB;
    use proptest::{prop_assert, prop_assert_eq};
    use test_strategy::proptest;

    #[test]
    fn test_even_split_offsets() {
        let spec = UploadSpec::builder()
            .object_size(Some("20MiB".into()))
            .part_size(Some("5MiB".into()))
            .concurrency(4)
            .build();
        let parts = plan(&UploadConfig::resolve(&spec).unwrap());

        let offsets: Vec<_> = parts.iter().map(PartDescriptor::offset).collect();
        assert_eq!(offsets, vec![0, 5 * MIB, 10 * MIB, 15 * MIB]);
        assert!(parts.iter().all(|part| part.length() == 5 * MIB));
        assert_eq!(parts.last().unwrap().end(), 20 * MIB);
    }

    #[test]
    fn test_count_driven_parts() {
        let spec = UploadSpec::builder()
            .part_size(Some("2MiB".into()))
            .parts_count(Some(3))
            .concurrency(1)
            .build();
        let parts = plan(&UploadConfig::resolve(&spec).unwrap());

        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(PartDescriptor::length).sum::<u64>(),
            6 * MIB
        );
        assert_eq!(parts[2].to_string(), "part 3 (offset 4194304, length 2097152)");
    }

    #[test]
    fn test_single_part() {
        let spec = UploadSpec::builder()
            .part_size(Some("7".into()))
            .parts_count(Some(1))
            .concurrency(1)
            .build();
        let parts = plan(&UploadConfig::resolve(&spec).unwrap());
        assert_eq!(parts.len(), 1);
        assert_eq!((parts[0].index(), parts[0].offset(), parts[0].length()), (1, 0, 7));
    }

    #[proptest]
    fn test_plan_covers_object(config: UploadConfig) {
        let parts = plan(&config);

        prop_assert_eq!(parts.len(), config.parts_count() as usize);
        let mut expected_offset = 0;
        for (i, part) in parts.iter().enumerate() {
            prop_assert_eq!(part.index() as usize, i + 1);
            prop_assert_eq!(part.offset(), expected_offset);
            prop_assert!(part.length() > 0);
            if part.index() < config.parts_count() {
                prop_assert_eq!(part.length(), config.part_size());
            } else {
                prop_assert_eq!(part.length(), config.last_part_size());
            }
            expected_offset = part.end();
        }
        prop_assert_eq!(expected_offset, config.object_size());
    }

    #[proptest]
    fn test_size_driven_parts_are_uniform(config: SizeDriven) {
        let config: UploadConfig = config.into();
        let parts = plan(&config);

        prop_assert_eq!(
            parts.len() as u64,
            config.object_size() / config.part_size()
        );
        prop_assert!(parts.iter().all(|part| part.length() == config.part_size()));
    }

    #[proptest]
    fn test_plan_is_repeatable(config: UploadConfig) {
        prop_assert_eq!(plan(&config), plan(&config));
    }
}
