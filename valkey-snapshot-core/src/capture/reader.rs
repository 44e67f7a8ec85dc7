/*!
Type-aware value reader.

Reads one key through a [`KeyspaceSource`] and serializes its value according
to the store's reported type. Composite values are JSON encoded; hashes also
keep their field map in `metadata`.
*/

use serde::Serialize;

use super::source::KeyspaceSource;
use crate::snapshot::{KeyType, SnapshotKey, NO_TTL};
use crate::{Result, SnapshotError};

/// `TYPE` reply for a key that no longer exists
const VANISHED: &str = "none";

#[derive(Serialize)]
struct ScoredMember<'a> {
    member: &'a str,
    score: f64,
}

/// Outcome of reading one key
#[derive(Debug)]
pub enum KeyRead {
    Captured(SnapshotKey),
    /// Listed by the scan but gone by the time it was read
    Vanished,
}

/// Read the type, TTL and value of `key`.
///
/// A failing TTL lookup degrades to [`NO_TTL`]. Failures of the type or
/// value reads come back as [`SnapshotError::Read`] so the caller can skip
/// the key; nothing here aborts a capture.
pub async fn read_key<S>(source: &mut S, key: &str) -> Result<KeyRead>
where
    S: KeyspaceSource + ?Sized,
{
    let raw_type = source
        .key_type(key)
        .await
        .map_err(|e| SnapshotError::read(format!("TYPE {key}: {e}")))?;
    if raw_type == VANISHED {
        return Ok(KeyRead::Vanished);
    }

    let ttl = match source.ttl(key).await {
        Ok(seconds) if seconds >= 0 => seconds,
        _ => NO_TTL,
    };

    let captured = read_value(source, key, KeyType::parse(&raw_type), ttl).await?;
    Ok(KeyRead::Captured(captured))
}

/// Read and serialize the value of a key whose type is already known
pub async fn read_value<S>(
    source: &mut S,
    key: &str,
    key_type: KeyType,
    ttl: i64,
) -> Result<SnapshotKey>
where
    S: KeyspaceSource + ?Sized,
{
    let mut entry = SnapshotKey::new(key, key_type, ttl);
    let failed = |e: SnapshotError| SnapshotError::read(format!("{key}: {e}"));

    match &entry.key_type {
        KeyType::String => {
            entry.value = source.get(key).await.map_err(failed)?;
        }
        KeyType::Hash => {
            let fields = source.hgetall(key).await.map_err(failed)?;
            entry.value = serde_json::to_string(&fields)?;
            entry.metadata = fields;
        }
        KeyType::List => {
            let items = source.lrange_all(key).await.map_err(failed)?;
            entry.value = serde_json::to_string(&items)?;
        }
        KeyType::Set => {
            let members = source.smembers(key).await.map_err(failed)?;
            entry.value = serde_json::to_string(&members)?;
        }
        KeyType::ZSet => {
            let scored = source.zrange_all_with_scores(key).await.map_err(failed)?;
            let pairs: Vec<ScoredMember<'_>> = scored
                .iter()
                .map(|(member, score)| ScoredMember {
                    member,
                    score: *score,
                })
                .collect();
            entry.value = serde_json::to_string(&pairs)?;
        }
        KeyType::Unknown(_) => {}
    }

    Ok(entry)
}
