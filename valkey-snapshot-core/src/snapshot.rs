/*!
Snapshot artifacts produced by the capture workers.

A [`SnapshotDocument`] is the logical export of one endpoint's key space; a
[`PhysicalArtifact`] is the raw byte image captured from a replication
stream. Both are owned by exactly one capture task and moved into the upload
sink once finalized.
*/

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key type as reported by the store's `TYPE` command.
///
/// Types the capture engine does not serialize are kept verbatim in
/// [`KeyType::Unknown`] so the document still records what was seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    String,
    Hash,
    List,
    Set,
    ZSet,
    Unknown(String),
}

impl KeyType {
    /// Parse the reply of a `TYPE` command
    pub fn parse(raw: &str) -> Self {
        match raw {
            "string" => KeyType::String,
            "hash" => KeyType::Hash,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "zset" => KeyType::ZSet,
            other => KeyType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyType::String => "string",
            KeyType::Hash => "hash",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::ZSet => "zset",
            KeyType::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for KeyType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(KeyType::parse(&raw))
    }
}

/// TTL recorded for keys without an expiry, or when the lookup failed
pub const NO_TTL: i64 = -1;

/// One captured key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotKey {
    pub key: String,

    /// Raw scalar for strings, JSON encoding for composite types
    pub value: String,

    #[serde(rename = "type")]
    pub key_type: KeyType,

    /// Seconds remaining, or [`NO_TTL`]
    pub ttl: i64,

    /// Field/value pairs, only populated for hashes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl SnapshotKey {
    pub fn new<S: Into<String>>(key: S, key_type: KeyType, ttl: i64) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            key_type,
            ttl,
            metadata: BTreeMap::new(),
        }
    }
}

/// Header of a logical snapshot document
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    /// Endpoint name from the configuration
    pub name: String,

    /// Address the keys were read from
    pub endpoint: String,

    pub database: u32,

    pub created_at: DateTime<Utc>,

    /// Always equal to the number of entries in `keys`
    pub count: usize,
}

/// Logical export of one endpoint's key space.
///
/// Keys appear in scan-encounter order. If the key space is mutated while the
/// scan runs the same key may appear more than once; that is not corrected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotDocument {
    pub metadata: SnapshotMetadata,
    pub keys: Vec<SnapshotKey>,
}

impl SnapshotDocument {
    pub fn new<N, E>(name: N, endpoint: E, database: u32, created_at: DateTime<Utc>) -> Self
    where
        N: Into<String>,
        E: Into<String>,
    {
        Self {
            metadata: SnapshotMetadata {
                name: name.into(),
                endpoint: endpoint.into(),
                database,
                created_at,
                count: 0,
            },
            keys: Vec::new(),
        }
    }

    /// Append a key, keeping the count in step
    pub fn push(&mut self, key: SnapshotKey) {
        self.keys.push(key);
        self.metadata.count = self.keys.len();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Raw replication stream image. Its contents are never parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalArtifact {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub data: Bytes,
}

/// Finished output of one capture task, ready for upload
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Logical(SnapshotDocument),
    Physical(PhysicalArtifact),
}

impl Artifact {
    pub fn endpoint_name(&self) -> &str {
        match self {
            Artifact::Logical(doc) => &doc.metadata.name,
            Artifact::Physical(artifact) => &artifact.name,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Artifact::Logical(doc) => doc.metadata.created_at,
            Artifact::Physical(artifact) => artifact.created_at,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Artifact::Logical(_) => "application/json",
            Artifact::Physical(_) => "application/octet-stream",
        }
    }

    /// Encode the artifact for upload, consuming it
    pub fn into_bytes(self) -> crate::Result<Bytes> {
        match self {
            Artifact::Logical(doc) => Ok(Bytes::from(serde_json::to_vec(&doc)?)),
            Artifact::Physical(artifact) => Ok(artifact.data),
        }
    }
}
