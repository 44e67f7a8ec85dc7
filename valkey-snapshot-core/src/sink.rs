/*!
Upload of finished artifacts.

The sink owns naming and encoding: it derives the object name from the
artifact, encodes it, and hands the bytes to the configured [`ObjectStore`].
Transient storage failures are retried according to the configured
[`RetryPolicy`]; with the default policy every artifact is attempted once.
*/

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use valkey_snapshot_retry::{with_backoff, RetryPolicy};

use crate::naming::{object_name, TimestampFormat};
use crate::observability;
use crate::snapshot::Artifact;
use crate::storage::ObjectStore;
use crate::Result;

/// Names, encodes and uploads artifacts
pub struct UploadSink {
    store: Arc<dyn ObjectStore>,
    timestamp_format: TimestampFormat,
    retry: RetryPolicy,
}

impl UploadSink {
    pub fn new(store: Arc<dyn ObjectStore>, timestamp_format: TimestampFormat) -> Self {
        Self {
            store,
            timestamp_format,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Human-readable location of the backing store
    pub fn destination(&self) -> String {
        self.store.describe()
    }

    /// Upload one artifact and return the object name it was stored under
    pub async fn deliver(&self, artifact: Artifact) -> Result<String> {
        let name = object_name(&artifact, &self.timestamp_format);
        let endpoint = artifact.endpoint_name().to_string();
        let content_type = artifact.content_type();
        let data = artifact.into_bytes()?;
        let size = data.len();
        let digest = format!("{:x}", Sha256::digest(&data));

        let attempts = AtomicUsize::new(0);
        let result = with_backoff("put_object", &self.retry, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            let data = data.clone();
            let name = name.as_str();
            async move { self.store.put(name, data, content_type).await }
        })
        .await;

        let retries = attempts.load(Ordering::Relaxed).saturating_sub(1);
        if retries > 0 {
            observability::record_upload_retries(retries);
        }

        match result {
            Ok(()) => {
                observability::record_artifact_size(size);
                info!(
                    endpoint = %endpoint,
                    object = %name,
                    bytes = size,
                    sha256 = %digest,
                    destination = %self.destination(),
                    "Uploaded snapshot"
                );
                Ok(name)
            }
            Err(e) => {
                warn!(
                    endpoint = %endpoint,
                    object = %name,
                    attempts = e.attempts(),
                    error = %e,
                    "Upload failed"
                );
                Err(e.into_inner())
            }
        }
    }
}
