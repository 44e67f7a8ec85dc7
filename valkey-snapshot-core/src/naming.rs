//! Object naming for uploaded artifacts
//!
//! Names are deterministic in the endpoint name, the database index (logical
//! snapshots only) and the artifact's creation timestamp:
//!
//! - logical: `<endpoint>/<database>/snapshot_<timestamp>.json`
//! - physical: `<endpoint>/snapshot_<timestamp>.rdb`

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::Artifact;
use crate::{Result, SnapshotError};

/// Default layout, written in the Go reference-time notation operators know
/// from the original configuration files.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "2006-01-02_15-04-05";

// Longest tokens first so `2006` wins over `06` and `January` over `Jan`.
const LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("2006", "%Y"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("_2", "%e"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("PM", "%p"),
];

/// Validated timestamp pattern used in object names.
///
/// Accepts either a chrono `strftime` pattern (anything containing `%`) or a
/// Go reference layout such as `2006-01-02_15-04-05`, which is translated
/// token by token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimestampFormat {
    layout: String,
    strftime: String,
}

impl TimestampFormat {
    pub fn parse(layout: &str) -> Result<Self> {
        let layout = layout.trim();
        if layout.is_empty() {
            return Err(SnapshotError::config("timestamp_format must not be empty"));
        }

        let strftime = if layout.contains('%') {
            layout.to_string()
        } else {
            translate_reference_layout(layout)
        };

        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(SnapshotError::config(format!(
                "invalid timestamp_format '{layout}'"
            )));
        }

        Ok(Self {
            layout: layout.to_string(),
            strftime,
        })
    }

    /// The pattern as written in the configuration
    pub fn layout(&self) -> &str {
        &self.layout
    }

    pub fn format(&self, at: &DateTime<Utc>) -> String {
        at.format(&self.strftime).to_string()
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self {
            layout: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            strftime: translate_reference_layout(DEFAULT_TIMESTAMP_FORMAT),
        }
    }
}

impl TryFrom<String> for TimestampFormat {
    type Error = SnapshotError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TimestampFormat> for String {
    fn from(value: TimestampFormat) -> Self {
        value.layout
    }
}

fn translate_reference_layout(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;

    'outer: while !rest.is_empty() {
        for (token, directive) in LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(directive);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    out
}

/// Object name for a logical snapshot
pub fn logical_object_name(name: &str, database: u32, timestamp: &str) -> String {
    format!("{name}/{database}/snapshot_{timestamp}.json")
}

/// Object name for a physical replication image
pub fn physical_object_name(name: &str, timestamp: &str) -> String {
    format!("{name}/snapshot_{timestamp}.rdb")
}

/// Compute the object name an artifact is uploaded under
pub fn object_name(artifact: &Artifact, format: &TimestampFormat) -> String {
    let timestamp = format.format(&artifact.created_at());
    let endpoint = artifact.endpoint_name();
    match artifact {
        Artifact::Logical(doc) => logical_object_name(endpoint, doc.metadata.database, &timestamp),
        Artifact::Physical(_) => physical_object_name(endpoint, &timestamp),
    }
}
