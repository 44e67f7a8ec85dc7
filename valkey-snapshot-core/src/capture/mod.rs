/*!
Capture workers.

Each endpoint is captured by one of two strategies, chosen purely from its
configuration:

- [`logical`]: walk the key space with `SCAN` and export every key as JSON
- [`physical`]: request a full resync and keep the raw replication image
*/

pub mod address;
pub mod logical;
pub mod physical;
pub mod reader;
pub mod source;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::config::{CaptureMode, EndpointConfig};
use crate::snapshot::Artifact;
use crate::Result;

/// How an endpoint is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    Logical,
    Physical,
}

impl CaptureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStrategy::Logical => "logical",
            CaptureStrategy::Physical => "physical",
        }
    }
}

/// Strategy for an endpoint, derived only from its configuration
pub fn select_strategy(endpoint: &EndpointConfig) -> CaptureStrategy {
    match endpoint.mode {
        CaptureMode::Logical => CaptureStrategy::Logical,
        CaptureMode::Physical => CaptureStrategy::Physical,
    }
}

/// Produces one artifact for one endpoint
#[async_trait]
pub trait Capturer: Send + Sync {
    async fn capture(&self, endpoint: &EndpointConfig) -> Result<Artifact>;
}

/// [`Capturer`] that talks to live endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCapturer;

#[async_trait]
impl Capturer for StoreCapturer {
    async fn capture(&self, endpoint: &EndpointConfig) -> Result<Artifact> {
        match select_strategy(endpoint) {
            CaptureStrategy::Logical => logical::capture(endpoint).await.map(Artifact::Logical),
            CaptureStrategy::Physical => physical::capture(endpoint).await.map(Artifact::Physical),
        }
    }
}
