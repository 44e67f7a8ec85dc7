//! Service configuration
//!
//! The configuration is a YAML document listing the endpoints to capture, the
//! storage backend and the schedule. String values may reference environment
//! variables as `$NAME` or `${NAME}`; references are resolved at load time and
//! unresolved ones are left verbatim. Loading applies defaults and validates
//! the result, so a [`ServerConfig`] handed to the engine is ready to use.

use serde::{Deserialize, Serialize};
use serde_yml::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::address::{endpoint_url, replication_address};
use crate::naming::TimestampFormat;
use crate::{Result, SnapshotError};

const REDACTED: &str = "********";

fn default_address() -> String {
    ":8080".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_batch_size() -> usize {
    10
}

fn default_inactivity_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Capture strategy for one endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Walk the key space and export every key as JSON
    #[default]
    Logical,
    /// Request a full resync and store the raw replication image
    Physical,
}

/// What to do when an endpoint's previous capture is still running at the
/// next tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Skip this endpoint for the round
    #[default]
    Skip,
    /// Wait for the running capture to finish, then capture
    Queue,
    /// Run captures concurrently without any gate
    Allow,
}

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// MinIO or any other S3 compatible object store
    Minio,
    /// Local directory
    Local,
}

/// One key-value store to capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique name, used as the object name prefix
    #[serde(default)]
    pub name: String,

    /// `host:port`, or a full `redis://` / `rediss://` URL
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub database: u32,

    /// Keys requested per scan page
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default)]
    pub mode: CaptureMode,

    /// Read silence that ends a physical capture
    #[serde(default = "default_inactivity_timeout", with = "duration_str")]
    pub inactivity_timeout: Duration,

    #[serde(default = "default_connect_timeout", with = "duration_str")]
    pub connect_timeout: Duration,
}

impl EndpointConfig {
    pub fn new<N: Into<String>, E: Into<String>>(name: N, endpoint: E) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            database: 0,
            batch_size: default_batch_size(),
            password: None,
            mode: CaptureMode::default(),
            inactivity_timeout: default_inactivity_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }

    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Password if one is configured and non-empty
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

/// Object storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub kind: BackendKind,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub accesskey: String,

    #[serde(default)]
    pub secretkey: String,

    /// Base directory for the `local` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the status surface
    #[serde(default = "default_address")]
    pub address: String,

    /// Time between capture rounds
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    #[serde(default)]
    pub backend: Option<BackendConfig>,

    #[serde(default)]
    pub timestamp_format: Option<TimestampFormat>,

    #[serde(default)]
    pub overlap: OverlapPolicy,

    /// Extra upload attempts for transient storage failures
    #[serde(default)]
    pub upload_retries: usize,
}

impl ServerConfig {
    /// Parse, expand and validate a YAML configuration document
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Self::from_yaml_str_with(raw, |name| std::env::var(name).ok())
    }

    /// Same as [`ServerConfig::from_yaml_str`] with an explicit variable lookup
    pub fn from_yaml_str_with<F>(raw: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut value: Value = serde_yml::from_str(raw)
            .map_err(|e| SnapshotError::config(format!("failed to read config: {e}")))?;
        expand_value(&mut value, &lookup);

        let mut config: ServerConfig = serde_yml::from_value(value)
            .map_err(|e| SnapshotError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply defaults and check invariants
    pub fn validate(&mut self) -> Result<()> {
        if self.address.trim().is_empty() {
            self.address = default_address();
        }

        if self.interval.is_zero() {
            return Err(SnapshotError::config("interval must be a positive duration"));
        }

        if self.endpoints.is_empty() {
            return Err(SnapshotError::config("at least one endpoint must be defined"));
        }

        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| SnapshotError::config("backend must be defined"))?;
        match backend.kind {
            BackendKind::Minio => {
                if backend.bucket.trim().is_empty() {
                    return Err(SnapshotError::config("minio backend requires a bucket"));
                }
                if backend.endpoint.trim().is_empty() {
                    return Err(SnapshotError::config("minio backend requires an endpoint"));
                }
            }
            BackendKind::Local => {
                if backend.path.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
                    return Err(SnapshotError::config("local backend requires a path"));
                }
            }
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(SnapshotError::config("every endpoint must define a name"));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(SnapshotError::config(format!(
                    "duplicate endpoint name found: {}",
                    endpoint.name
                )));
            }
            if endpoint.endpoint.trim().is_empty() {
                return Err(SnapshotError::config(format!(
                    "entry '{}' must define an endpoint",
                    endpoint.name
                )));
            }
            if endpoint.batch_size == 0 {
                return Err(SnapshotError::config(format!(
                    "entry '{}' must use a batch_size above zero",
                    endpoint.name
                )));
            }
            if endpoint.inactivity_timeout.is_zero() || endpoint.connect_timeout.is_zero() {
                return Err(SnapshotError::config(format!(
                    "entry '{}' timeouts must be positive durations",
                    endpoint.name
                )));
            }
            match endpoint.mode {
                CaptureMode::Logical => {
                    endpoint_url(endpoint)?;
                }
                CaptureMode::Physical => {
                    replication_address(endpoint)?;
                }
            }
        }

        Ok(())
    }

    pub fn timestamp_format(&self) -> TimestampFormat {
        self.timestamp_format.clone().unwrap_or_default()
    }

    /// Socket address to bind; a bare `:port` listens on all interfaces
    pub fn listen_addr(&self) -> String {
        match self.address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.address.clone(),
        }
    }

    /// Copy of the configuration with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for endpoint in &mut copy.endpoints {
            if endpoint.password().is_some() {
                endpoint.password = Some(REDACTED.to_string());
            }
        }
        if let Some(backend) = copy.backend.as_mut() {
            if !backend.secretkey.is_empty() {
                backend.secretkey = REDACTED.to_string();
            }
        }
        copy
    }
}

/// Read and validate the configuration file at `path`
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SnapshotError::config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    ServerConfig::from_yaml_str(&raw)
}

fn expand_value<F>(value: &mut Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(raw) => {
            let expanded = expand_env(raw, lookup);
            if expanded == *raw {
                return;
            }
            // a scalar that was a single reference may carry a number or bool
            if is_single_reference(raw) {
                if let Ok(scalar @ (Value::Number(_) | Value::Bool(_))) =
                    serde_yml::from_str::<Value>(&expanded)
                {
                    *value = scalar;
                    return;
                }
            }
            *raw = expanded;
        }
        Value::Sequence(items) => {
            for item in items {
                expand_value(item, lookup);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                expand_value(item, lookup);
            }
        }
        Value::Tagged(tagged) => expand_value(&mut tagged.value, lookup),
        _ => {}
    }
}

fn is_single_reference(raw: &str) -> bool {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        return !inner.is_empty() && inner.chars().all(is_var_char);
    }
    match raw.strip_prefix('$') {
        Some(name) => !name.is_empty() && name.chars().all(is_var_char),
        None => false,
    }
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace `$NAME` and `${NAME}` references; unknown names stay verbatim
pub fn expand_env<F>(input: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after.find(|c: char| !is_var_char(c)).unwrap_or(after.len());
            (&after[..end], end)
        };

        let reference = &rest[pos..pos + 1 + consumed];
        match (name.is_empty(), lookup(name)) {
            (false, Some(resolved)) => out.push_str(&resolved),
            _ => out.push_str(if consumed == 0 { "$" } else { reference }),
        }
        rest = &rest[pos + 1 + consumed..];
    }

    out.push_str(rest);
    out
}

/// Durations written as humantime strings (`60m`, `5s`, `1h 30m`)
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid duration '{raw}': {e}")))
    }
}
