/*!
Memory-based storage adapter.
*/

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use super::ObjectStore;
use crate::{Result, SnapshotError};

/// A stored object
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// Keeps objects in a shared map. Useful for tests and dry runs.
///
/// Clones share the same contents. Names registered with
/// [`MemoryObjectStore::fail_prefix`] are rejected, and
/// [`MemoryObjectStore::fail_next`] rejects a number of puts with a transient
/// error before accepting again.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    failing_prefixes: Arc<Mutex<HashSet<String>>>,
    transient_failures: Arc<Mutex<usize>>,
    attempts: Arc<Mutex<usize>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every object whose name starts with `prefix`
    pub fn fail_prefix<S: Into<String>>(&self, prefix: S) {
        lock(&self.failing_prefixes).insert(prefix.into());
    }

    /// Reject the next `count` puts with a transient error
    pub fn fail_next(&self, count: usize) {
        *lock(&self.transient_failures) = count;
    }

    pub fn get(&self, name: &str) -> Option<StoredObject> {
        lock(&self.objects).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }

    /// Number of put calls seen, including rejected ones
    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, name: &str, data: Bytes, content_type: &str) -> Result<()> {
        *lock(&self.attempts) += 1;

        if lock(&self.failing_prefixes)
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
        {
            return Err(SnapshotError::upload(format!(
                "Access denied for object '{name}'"
            )));
        }

        {
            let mut remaining = lock(&self.transient_failures);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SnapshotError::transient_upload("put_object request timed out"));
            }
        }

        lock(&self.objects).insert(
            name.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
