/*!
# Valkey Snapshot Core

Capture engine for scheduled Valkey/Redis snapshots.

On every round the engine visits each configured endpoint concurrently,
captures its data and uploads the result to object storage:

- **Logical capture** walks the key space with `SCAN` and exports every key,
  its type, TTL and value as a JSON document
- **Physical capture** requests a full resync over the replication protocol
  and stores the raw stream until it goes idle

## Architecture

- [`scheduler`] fires rounds at a fixed interval
- [`orchestrator`] runs one isolated task per endpoint and reports the round
- [`capture`] holds the logical and physical workers
- [`sink`] names, encodes and uploads artifacts through a [`storage::ObjectStore`]

## Usage

```rust,no_run
use std::sync::Arc;
use valkey_snapshot_core::{
    capture::StoreCapturer, load_config, storage::create_store, Orchestrator, UploadSink,
};

# async fn run() -> valkey_snapshot_core::Result<()> {
let config = load_config("config.yml")?;
let backend = config.backend.clone().ok_or_else(|| {
    valkey_snapshot_core::SnapshotError::config("backend must be defined")
})?;
let store = create_store(&backend).await?;

let sink = UploadSink::new(store, config.timestamp_format());
let orchestrator = Orchestrator::new(Arc::new(StoreCapturer), Arc::new(sink));

let report = orchestrator.run_round(&config.endpoints).await;
println!("{} uploaded, {} failed", report.succeeded, report.failed);
# Ok(())
# }
```
*/

pub mod capture;
pub mod config;
pub mod error;
pub mod naming;
pub mod observability;
pub mod orchestrator;
pub mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod storage;

pub use capture::{select_strategy, CaptureStrategy, Capturer, StoreCapturer};
pub use config::{
    load_config, BackendConfig, BackendKind, CaptureMode, EndpointConfig, OverlapPolicy,
    ServerConfig,
};
pub use error::{Result, SnapshotError};
pub use naming::TimestampFormat;
pub use orchestrator::{EndpointOutcome, EndpointReport, Orchestrator, RoundReport};
pub use scheduler::{parse_interval, Scheduler};
pub use sink::UploadSink;
pub use snapshot::{Artifact, KeyType, PhysicalArtifact, SnapshotDocument, SnapshotKey};
pub use storage::{create_store, ObjectStore};

pub use valkey_snapshot_retry::RetryPolicy;
