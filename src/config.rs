//! Loading of the shared [aws_types::SdkConfig](https://docs.rs/aws-types/latest/aws_types/sdk_config/struct.SdkConfig.html)
//! used by the S3 storage client.

use anyhow::{Context, Result};
use aws_types::region::Region;
use aws_types::SdkConfig;
use http::Uri;
use std::env;
use std::str::FromStr;

/// Port of the LocalStack edge service when `EDGE_PORT` is unset.
const DEFAULT_EDGE_PORT: &str = "4566";

/// Resolve the endpoint the S3 client should talk to.
///
/// An `explicit` endpoint (e.g. a MinIO or S3 compatible gateway) takes
/// precedence. Otherwise, if `LOCALSTACK_HOSTNAME` is set, a
/// [LocalStack](https://localstack.cloud/) endpoint is built from it and
/// `EDGE_PORT`. `None` leaves endpoint resolution to the SDK.
///
/// ## Errors
///
/// An error is returned if the chosen endpoint is not a valid URI.
pub fn endpoint_uri(explicit: Option<&str>) -> Result<Option<Uri>> {
    resolve_endpoint(
        explicit,
        env::var("LOCALSTACK_HOSTNAME").ok(),
        env::var("EDGE_PORT").ok(),
    )
}

fn resolve_endpoint(
    explicit: Option<&str>,
    localstack_host: Option<String>,
    edge_port: Option<String>,
) -> Result<Option<Uri>> {
    let endpoint = match (explicit, localstack_host) {
        (Some(endpoint), _) => endpoint.to_owned(),
        (None, Some(host)) => format!(
            "http://{host}:{}",
            edge_port.as_deref().unwrap_or(DEFAULT_EDGE_PORT)
        ),
        (None, None) => return Ok(None),
    };
    Uri::from_str(&endpoint)
        .map(Some)
        .with_context(|| format!("Invalid endpoint URI: {endpoint}"))
}

/// Create a shared `SdkConfig` from the environment, optionally pinned to an
/// endpoint and region.
///
/// # Example
///
/// ```
/// use cobalt_mpu_bench::config::{endpoint_uri, load_sdk_config};
///
/// # tokio_test::block_on(async {
/// let endpoint = endpoint_uri(None).unwrap();
/// let shared_config = load_sdk_config(endpoint.as_ref(), Some("ap-southeast-2".into())).await;
/// # })
/// ```
pub async fn load_sdk_config(endpoint: Option<&Uri>, region: Option<String>) -> SdkConfig {
    let mut shared_config = aws_config::from_env();
    if let Some(uri) = endpoint {
        shared_config = shared_config.endpoint_url(uri.to_string());
    }
    if let Some(region) = region {
        shared_config = shared_config.region(Region::new(region));
    }
    shared_config.load().await
}

#[cfg(test)]
mod test {
    use super::*;

    use serial_test::serial;

    #[test]
    fn test_resolve_endpoint() {
        let cases = [
            (None, None, None, None),
            (
                None,
                Some("test_hostname"),
                None,
                Some("http://test_hostname:4566/"),
            ),
            (
                None,
                Some("test_hostname"),
                Some("1234"),
                Some("http://test_hostname:1234/"),
            ),
            (
                Some("http://minio:9000"),
                Some("test_hostname"),
                Some("1234"),
                Some("http://minio:9000/"),
            ),
        ];
        for (explicit, host, port, expected) in cases {
            let uri = resolve_endpoint(explicit, host.map(Into::into), port.map(Into::into))
                .unwrap()
                .map(|uri| uri.to_string());
            assert_eq!(uri.as_deref(), expected, "{explicit:?} {host:?} {port:?}");
        }
    }

    #[test]
    fn test_resolve_endpoint_invalid() {
        let err = resolve_endpoint(None, Some("bad:host".into()), Some("not-a-number".into()))
            .unwrap_err();
        assert!(err.to_string().contains("http://bad:host:not-a-number"));
        assert!(resolve_endpoint(Some("not a uri"), None, None).is_err());
    }

    #[test]
    #[serial]
    fn test_endpoint_uri_from_env() {
        let saved: Vec<_> = ["LOCALSTACK_HOSTNAME", "EDGE_PORT"]
            .into_iter()
            .map(|name| (name, env::var(name).ok()))
            .collect();
        env::set_var("LOCALSTACK_HOSTNAME", "localstack");
        env::remove_var("EDGE_PORT");

        let uri = endpoint_uri(None);

        for (name, value) in saved {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
        assert_eq!(
            uri.unwrap(),
            Some(Uri::from_static("http://localstack:4566"))
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_load_sdk_config_region() {
        let shared_config = load_sdk_config(None, Some("ap-southeast-2".into())).await;
        assert_eq!(
            shared_config.region().map(ToString::to_string),
            Some("ap-southeast-2".to_string())
        );
    }
}
