use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where benchmark objects are written: a bucket and a key prefix,
/// parsed from `s3://bucket/prefix` URLs.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct BenchTarget {
    bucket: String,
    prefix: String,
}

impl BenchTarget {
    /// Leading and trailing `/` are trimmed from the prefix. No validation is
    /// done against the AWS naming rules.
    pub fn new(bucket: impl AsRef<str>, prefix: impl AsRef<str>) -> Self {
        BenchTarget {
            bucket: bucket.as_ref().to_owned(),
            prefix: prefix.as_ref().trim_matches('/').to_owned(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The key prefix, empty when objects go to the bucket root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// The scheme must be `s3`. The path may be empty.
impl TryFrom<Url> for BenchTarget {
    type Error = Error;

    fn try_from(value: Url) -> Result<Self, Self::Error> {
        if value.scheme() != "s3" {
            bail!("S3 URL must have a scheme of s3")
        }
        let bucket = value.host_str().context("S3 URL must have a bucket")?;
        if value.query().is_some() || value.fragment().is_some() {
            bail!("S3 URL must not have a query or fragment")
        }
        Ok(BenchTarget::new(bucket, value.path()))
    }
}

impl FromStr for BenchTarget {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .parse::<Url>()
            .with_context(|| format!("Invalid target URL {value}"))?
            .try_into()
    }
}

impl fmt::Display for BenchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}
