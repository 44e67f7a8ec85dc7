/*!
Storage adapters for finished artifacts.

The capture engine only needs one capability from a backend: store a named
blob with a content type. [`ObjectStore`] is that port; the adapters below
implement it for S3 compatible object storage, a local directory and memory.
*/

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::config::{BackendConfig, BackendKind};
use crate::{Result, SnapshotError};

/// Destination for uploaded artifacts
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `name`, replacing any existing object
    ///
    /// # Arguments
    /// * `name` - Object key, `/` separated
    /// * `data` - Artifact bytes
    /// * `content_type` - MIME type recorded with the object
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Human readable destination for logs
    fn describe(&self) -> String;
}

/// Build the configured storage backend
pub async fn create_store(config: &BackendConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.kind {
        BackendKind::Minio => {
            #[cfg(feature = "s3")]
            {
                let store = s3::S3ObjectStore::from_backend(config).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "s3"))]
            {
                Err(SnapshotError::config(
                    "minio backend requires the 's3' feature",
                ))
            }
        }
        BackendKind::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| SnapshotError::config("local backend requires a path"))?;
            Ok(Arc::new(local::LocalObjectStore::new(path)))
        }
    }
}

// Re-export types for convenience
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;
