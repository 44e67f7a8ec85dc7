/*!
S3 compatible object storage adapter.

Targets MinIO and other S3 compatible services through the official AWS SDK,
using the endpoint, region and static credentials from the backend settings.
*/

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use tracing::{debug, error, info};

use super::ObjectStore;
use crate::config::BackendConfig;
use crate::{Result, SnapshotError};

const DEFAULT_REGION: &str = "us-east-1";

/// S3 compatible object store
///
/// Requests use path-style addressing (`<endpoint>/<bucket>/<key>`), which
/// MinIO expects.
///
/// # Example
/// ```rust,no_run
/// use valkey_snapshot_core::config::{BackendConfig, BackendKind};
/// use valkey_snapshot_core::storage::{ObjectStore, S3ObjectStore};
///
/// # async fn run() -> valkey_snapshot_core::Result<()> {
/// let backend = BackendConfig {
///     kind: BackendKind::Minio,
///     endpoint: "http://localhost:9000".to_string(),
///     bucket: "snapshots".to_string(),
///     region: String::new(),
///     accesskey: "minio".to_string(),
///     secretkey: "minio123".to_string(),
///     path: None,
/// };
/// let store = S3ObjectStore::from_backend(&backend).await?;
/// store.put("cache1/snapshot.rdb", b"REDIS".to_vec().into(), "application/octet-stream").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    endpoint: String,
}

impl S3ObjectStore {
    /// Create a store from backend settings
    pub async fn from_backend(config: &BackendConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(SnapshotError::config("S3 backend requires a bucket name"));
        }

        let endpoint = endpoint_url(&config.endpoint);
        let region = if config.region.trim().is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            config.region.trim().to_string()
        };
        let credentials = Credentials::new(
            config.accesskey.clone(),
            config.secretkey.clone(),
            None,
            None,
            "valkey-snapshot-config",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .load()
            .await;

        Ok(Self::with_config(config.bucket.clone(), endpoint, &sdk_config))
    }

    /// Create a store from an existing SDK configuration
    pub fn with_config(bucket: String, endpoint: String, sdk_config: &SdkConfig) -> Self {
        let s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(true)
            .build();
        let client = S3Client::from_conf(s3_config);

        info!(bucket = %bucket, endpoint = %endpoint, "Initialized S3 object store");

        Self {
            client,
            bucket,
            endpoint,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> Result<()> {
        let size = data.len();
        debug!(
            bucket = %self.bucket,
            key = %name,
            size,
            "Starting S3 put_object operation"
        );

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .content_type(content_type)
            .content_length(size as i64)
            .body(ByteStream::from(data))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(bucket = %self.bucket, key = %name, size, "Stored object in S3");
                Ok(())
            }
            Err(e) => {
                let mapped = map_s3_error("put_object", e, name);
                error!(
                    bucket = %self.bucket,
                    key = %name,
                    error = %mapped,
                    "Failed to store object in S3"
                );
                Err(mapped)
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket)
    }
}

/// Endpoint URL for the SDK; a bare `host:port` is treated as plain HTTP
fn endpoint_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

/// Service error codes S3 compatible backends return for conditions that
/// clear on their own
const TRANSIENT_CODES: &[&str] = &[
    "RequestTimeout",
    "RequestTimeTooSkewed",
    "InternalError",
    "SlowDown",
    "ServiceUnavailable",
    "Throttling",
];

/// Whether a service error response is worth retrying
fn is_transient_service_error(code: Option<&str>, status: u16) -> bool {
    status >= 500 || status == 429 || code.is_some_and(|c| TRANSIENT_CODES.contains(&c))
}

/// Map AWS SDK errors to upload errors with context.
///
/// Transport failures (dispatch, timeout, unreadable response) are transient.
/// Service errors are transient only for throttling, timeout and 5xx replies.
fn map_s3_error<E>(op: &str, error: SdkError<E, HttpResponse>, key: &str) -> SnapshotError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(dispatch_err) => SnapshotError::transient_upload(format!(
            "S3 {op} request failed to dispatch: {dispatch_err:?}"
        )),
        SdkError::TimeoutError(_) => {
            SnapshotError::transient_upload(format!("S3 {op} request timed out (key: {key})"))
        }
        SdkError::ResponseError(response_err) => {
            SnapshotError::transient_upload(format!("S3 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => {
            let code = service_err.err().code();
            let status = service_err.raw().status().as_u16();
            let message = match code {
                Some("NoSuchBucket") => "S3 bucket not found".to_string(),
                Some("AccessDenied") | Some("Forbidden") => {
                    "Access denied to S3 (check credentials and permissions)".to_string()
                }
                Some("InvalidBucketName") => "Invalid S3 bucket name".to_string(),
                Some(code) => format!(
                    "S3 service error ({}): {}",
                    code,
                    service_err.err().message().unwrap_or("Unknown error")
                ),
                None => format!("S3 {op} service error (HTTP {status}): {service_err:?}"),
            };
            if is_transient_service_error(code, status) {
                SnapshotError::transient_upload(message)
            } else {
                SnapshotError::upload(message)
            }
        }
        _ => SnapshotError::upload(format!("S3 {op} error: {error}")),
    }
}
