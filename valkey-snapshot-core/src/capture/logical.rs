/*!
Logical capture: a full `SCAN` traversal exporting every key as JSON.

The traversal is not atomic. Writers are not paused, so a key mutated during
the scan may be captured in either state or more than once. A failed `SCAN`
aborts the capture; a failed read of one key only skips that key, as does a
key whose name is not UTF-8 and so cannot be written into the document.
*/

use chrono::Utc;
use tracing::{debug, info};

use super::reader::{read_key, KeyRead};
use super::source::{KeyspaceSource, RedisSource, START_CURSOR};
use crate::config::EndpointConfig;
use crate::observability;
use crate::snapshot::SnapshotDocument;
use crate::Result;

/// Connect to the endpoint and export its key space
pub async fn capture(endpoint: &EndpointConfig) -> Result<SnapshotDocument> {
    let mut source = RedisSource::connect(endpoint).await?;
    capture_keyspace(&mut source, endpoint).await
}

/// Export the key space reachable through `source`.
///
/// Pages of up to `batch_size` keys are requested until the store hands back
/// the start cursor.
pub async fn capture_keyspace<S>(source: &mut S, endpoint: &EndpointConfig) -> Result<SnapshotDocument>
where
    S: KeyspaceSource + ?Sized,
{
    let mut document = SnapshotDocument::new(
        &endpoint.name,
        &endpoint.endpoint,
        endpoint.database,
        Utc::now(),
    );
    let mut cursor = START_CURSOR;
    let mut pages = 0usize;
    let mut skipped = 0usize;

    loop {
        let (next, keys) = source.scan(cursor, endpoint.batch_size).await?;
        pages += 1;

        for raw in keys {
            let key = match String::from_utf8(raw) {
                Ok(key) => key,
                Err(e) => {
                    skipped += 1;
                    debug!(
                        endpoint = %endpoint.name,
                        key = %String::from_utf8_lossy(e.as_bytes()),
                        "Skipping key that is not valid UTF-8"
                    );
                    continue;
                }
            };
            match read_key(source, &key).await {
                Ok(KeyRead::Captured(entry)) => document.push(entry),
                Ok(KeyRead::Vanished) => {
                    skipped += 1;
                    debug!(endpoint = %endpoint.name, key = %key, "Key vanished before it was read");
                }
                Err(e) => {
                    skipped += 1;
                    debug!(endpoint = %endpoint.name, key = %key, error = %e, "Skipping unreadable key");
                }
            }
        }

        if next == START_CURSOR {
            break;
        }
        cursor = next;
    }

    observability::record_keys_skipped(skipped);
    info!(
        endpoint = %endpoint.name,
        database = endpoint.database,
        keys = document.len(),
        skipped,
        pages,
        "Logical capture complete"
    );

    Ok(document)
}
