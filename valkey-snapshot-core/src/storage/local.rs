/*!
Local directory storage adapter.
*/

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ObjectStore;
use crate::{Result, SnapshotError};

/// Writes artifacts as files below a base directory.
///
/// Object names map to relative paths, so `cache1/0/snapshot_x.json` lands in
/// `<base>/cache1/0/snapshot_x.json`. Missing directories are created.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_dir: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Resolve the full path for an object name
    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(SnapshotError::upload(format!(
                "object name '{name}' escapes the storage directory"
            )));
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> Result<()> {
        let full_path = self.resolve_path(name)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SnapshotError::upload(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&full_path, &data).await.map_err(|e| {
            SnapshotError::upload(format!(
                "Failed to write artifact to {}: {}",
                full_path.display(),
                e
            ))
        })?;

        debug!(path = %full_path.display(), size = data.len(), content_type, "Wrote artifact");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.base_dir.display())
    }
}
