/*!
Capture rounds.

A round launches one task per endpoint. Tasks share nothing but the
capturer and the upload sink, and every failure is resolved inside its task
into an [`EndpointOutcome`], so one endpoint can never affect another.

The orchestrator keeps the task handles and folds their outcomes into a
[`RoundReport`]. An optional per-endpoint gate bounds how many captures of
the same endpoint may be in flight when rounds overlap.
*/

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{Mutex as Gate, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capture::{select_strategy, Capturer};
use crate::config::{EndpointConfig, OverlapPolicy};
use crate::observability;
use crate::sink::UploadSink;

/// Result of one endpoint's task within a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EndpointOutcome {
    Uploaded { object: String },
    Failed { kind: String, message: String },
    /// Not started because a previous capture was still running
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointReport {
    pub name: String,
    pub strategy: &'static str,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: EndpointOutcome,
}

/// Aggregated view of one round, for logs and the status surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub endpoints: Vec<EndpointReport>,
}

impl RoundReport {
    fn new(
        id: Uuid,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        endpoints: Vec<EndpointReport>,
    ) -> Self {
        let count = |f: fn(&EndpointOutcome) -> bool| {
            endpoints.iter().filter(|e| f(&e.outcome)).count()
        };
        Self {
            id,
            started_at,
            duration_ms,
            succeeded: count(|o| matches!(o, EndpointOutcome::Uploaded { .. })),
            failed: count(|o| matches!(o, EndpointOutcome::Failed { .. })),
            skipped: count(|o| matches!(o, EndpointOutcome::Skipped)),
            endpoints,
        }
    }
}

/// Launches capture rounds
pub struct Orchestrator {
    capturer: Arc<dyn Capturer>,
    sink: Arc<UploadSink>,
    overlap: OverlapPolicy,
    gates: Mutex<HashMap<String, Arc<Gate<()>>>>,
    last_report: Mutex<Option<RoundReport>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a task relates to its endpoint's gate
enum GateHold {
    Free,
    Held(OwnedMutexGuard<()>),
    Wait(Arc<Gate<()>>),
}

impl Orchestrator {
    pub fn new(capturer: Arc<dyn Capturer>, sink: Arc<UploadSink>) -> Self {
        Self {
            capturer,
            sink,
            overlap: OverlapPolicy::default(),
            gates: Mutex::new(HashMap::new()),
            last_report: Mutex::new(None),
        }
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Report of the most recently finished round
    pub fn last_report(&self) -> Option<RoundReport> {
        lock(&self.last_report).clone()
    }

    fn gate(&self, name: &str) -> Arc<Gate<()>> {
        lock(&self.gates)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Gate::new(())))
            .clone()
    }

    /// `None` when the endpoint is busy and should be skipped
    fn admit(&self, endpoint: &EndpointConfig) -> Option<GateHold> {
        match self.overlap {
            OverlapPolicy::Allow => Some(GateHold::Free),
            OverlapPolicy::Skip => self
                .gate(&endpoint.name)
                .try_lock_owned()
                .ok()
                .map(GateHold::Held),
            OverlapPolicy::Queue => Some(GateHold::Wait(self.gate(&endpoint.name))),
        }
    }

    /// Capture and upload every endpoint concurrently
    ///
    /// Tasks are spawned before anything is awaited; the returned report
    /// is complete once every task has finished.
    pub async fn run_round(&self, endpoints: &[EndpointConfig]) -> RoundReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let span = info_span!("round", round = %id);

        observability::record_round_started();
        span.in_scope(|| info!(endpoints = endpoints.len(), "Starting snapshot round"));

        let mut handles: Vec<(String, &'static str, JoinHandle<EndpointReport>)> =
            Vec::with_capacity(endpoints.len());
        let mut reports = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let strategy = select_strategy(endpoint).as_str();
            let Some(gate) = self.admit(endpoint) else {
                span.in_scope(|| {
                    warn!(endpoint = %endpoint.name, "Previous capture still running, skipping")
                });
                observability::record_endpoint_skipped();
                reports.push(EndpointReport {
                    name: endpoint.name.clone(),
                    strategy,
                    duration_ms: 0,
                    outcome: EndpointOutcome::Skipped,
                });
                continue;
            };

            let task = capture_task(
                Arc::clone(&self.capturer),
                Arc::clone(&self.sink),
                endpoint.clone(),
                gate,
            )
            .instrument(info_span!(parent: &span, "capture", endpoint = %endpoint.name, strategy));

            handles.push((endpoint.name.clone(), strategy, tokio::spawn(task)));
        }

        for (name, strategy, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    span.in_scope(|| error!(endpoint = %name, error = %e, "Capture task aborted"));
                    EndpointReport {
                        name,
                        strategy,
                        duration_ms: 0,
                        outcome: EndpointOutcome::Failed {
                            kind: "task".to_string(),
                            message: e.to_string(),
                        },
                    }
                }
            };
            reports.push(report);
        }

        let report = RoundReport::new(id, started_at, elapsed_ms(started), reports);
        span.in_scope(|| {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                duration_ms = report.duration_ms,
                "Snapshot round finished"
            )
        });

        *lock(&self.last_report) = Some(report.clone());
        report
    }
}

async fn capture_task(
    capturer: Arc<dyn Capturer>,
    sink: Arc<UploadSink>,
    endpoint: EndpointConfig,
    gate: GateHold,
) -> EndpointReport {
    let _guard = match gate {
        GateHold::Free => None,
        GateHold::Held(guard) => Some(guard),
        GateHold::Wait(gate) => {
            debug!("Waiting for previous capture to finish");
            Some(gate.lock_owned().await)
        }
    };

    let started = Instant::now();
    let strategy = select_strategy(&endpoint).as_str();

    let result = match capturer.capture(&endpoint).await {
        Ok(artifact) => sink.deliver(artifact).await,
        Err(e) => Err(e),
    };
    let duration = started.elapsed();
    observability::record_capture(result.is_ok(), duration);

    let outcome = match result {
        Ok(object) => EndpointOutcome::Uploaded { object },
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Snapshot failed");
            EndpointOutcome::Failed {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }
        }
    };

    EndpointReport {
        name: endpoint.name,
        strategy,
        duration_ms: duration.as_millis() as u64,
        outcome,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::TimestampFormat;
    use crate::snapshot::{Artifact, PhysicalArtifact};
    use crate::storage::MemoryObjectStore;
    use crate::{Result, SnapshotError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Fails endpoints named in `unreachable`; others return a fixed image
    /// after an optional delay
    #[derive(Default)]
    struct FakeCapturer {
        unreachable: HashSet<String>,
        delay: Duration,
        calls: Mutex<usize>,
        release: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl Capturer for FakeCapturer {
        async fn capture(&self, endpoint: &EndpointConfig) -> Result<Artifact> {
            *lock(&self.calls) += 1;
            if let Some(release) = &self.release {
                release.notified().await;
            }
            tokio::time::sleep(self.delay).await;
            if self.unreachable.contains(&endpoint.name) {
                return Err(SnapshotError::connect(&endpoint.endpoint, "connection refused"));
            }
            Ok(Artifact::Physical(PhysicalArtifact {
                name: endpoint.name.clone(),
                created_at: Utc::now(),
                data: Bytes::from_static(b"REDIS0011"),
            }))
        }
    }

    fn orchestrator(capturer: FakeCapturer, store: &MemoryObjectStore) -> Orchestrator {
        let sink = UploadSink::new(Arc::new(store.clone()), TimestampFormat::default());
        Orchestrator::new(Arc::new(capturer), Arc::new(sink))
    }

    fn endpoints(names: &[&str]) -> Vec<EndpointConfig> {
        names
            .iter()
            .map(|n| EndpointConfig::new(*n, format!("{n}:6379")))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_endpoint_does_not_affect_others() {
        let store = MemoryObjectStore::new();
        let capturer = FakeCapturer {
            unreachable: HashSet::from(["a".to_string()]),
            ..Default::default()
        };
        let orchestrator = orchestrator(capturer, &store);

        let report = orchestrator.run_round(&endpoints(&["a", "b"])).await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        let a = report.endpoints.iter().find(|e| e.name == "a").unwrap();
        assert!(matches!(&a.outcome, EndpointOutcome::Failed { kind, .. } if kind == "connect"));
        let b = report.endpoints.iter().find(|e| e.name == "b").unwrap();
        let EndpointOutcome::Uploaded { object } = &b.outcome else {
            panic!("expected upload for b, got {:?}", b.outcome);
        };
        assert!(object.starts_with("b/snapshot_"));
        assert!(store.get(object).is_some());
        assert_eq!(orchestrator.last_report(), Some(report));
    }

    #[tokio::test]
    async fn test_upload_failure_is_isolated() {
        let store = MemoryObjectStore::new();
        store.fail_prefix("a/");
        let orchestrator = orchestrator(FakeCapturer::default(), &store);

        let report = orchestrator.run_round(&endpoints(&["a", "b"])).await;

        assert_eq!(report.succeeded, 1);
        let a = report.endpoints.iter().find(|e| e.name == "a").unwrap();
        assert!(matches!(&a.outcome, EndpointOutcome::Failed { kind, .. } if kind == "upload"));
    }

    #[tokio::test]
    async fn test_tasks_run_concurrently() {
        let store = MemoryObjectStore::new();
        let release = Arc::new(Notify::new());
        let capturer = Arc::new(FakeCapturer {
            release: Some(Arc::clone(&release)),
            ..Default::default()
        });
        let sink = UploadSink::new(Arc::new(store.clone()), TimestampFormat::default());
        let orchestrator = Orchestrator::new(capturer.clone(), Arc::new(sink));

        let names = endpoints(&["a", "b", "c"]);
        let round = orchestrator.run_round(&names);
        tokio::pin!(round);

        // every task must be waiting before any is released
        loop {
            tokio::select! {
                _ = &mut round => panic!("round finished before release"),
                _ = tokio::task::yield_now() => {}
            }
            if *lock(&capturer.calls) == 3 {
                break;
            }
        }
        release.notify_waiters();

        let report = round.await;
        assert_eq!(report.succeeded, 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_policy_skips_busy_endpoint() {
        let store = MemoryObjectStore::new();
        let capturer = FakeCapturer {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let orchestrator = Arc::new(
            orchestrator(capturer, &store).with_overlap(OverlapPolicy::Skip),
        );
        let names = endpoints(&["a"]);

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let names = names.clone();
            tokio::spawn(async move { orchestrator.run_round(&names).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = orchestrator.run_round(&names).await;
        assert_eq!(second.skipped, 1);
        assert_eq!(second.endpoints[0].outcome, EndpointOutcome::Skipped);

        let first = first.await.unwrap();
        assert_eq!(first.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_policy_waits_for_previous_capture() {
        let store = MemoryObjectStore::new();
        let capturer = FakeCapturer {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let orchestrator = Arc::new(
            orchestrator(capturer, &store).with_overlap(OverlapPolicy::Queue),
        );
        let names = endpoints(&["a"]);

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let names = names.clone();
            tokio::spawn(async move { orchestrator.run_round(&names).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = tokio::time::Instant::now();
        let second = orchestrator.run_round(&names).await;

        assert_eq!(second.succeeded, 1);
        // 29s left on the first capture plus 30s for its own
        assert!(started.elapsed() >= Duration::from_secs(59));
        assert_eq!(first.await.unwrap().succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_policy_overlaps() {
        let store = MemoryObjectStore::new();
        let capturer = FakeCapturer {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let orchestrator = Arc::new(
            orchestrator(capturer, &store).with_overlap(OverlapPolicy::Allow),
        );
        let names = endpoints(&["a"]);

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let names = names.clone();
            tokio::spawn(async move { orchestrator.run_round(&names).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = tokio::time::Instant::now();
        let second = orchestrator.run_round(&names).await;

        assert_eq!(second.succeeded, 1);
        assert!(started.elapsed() < Duration::from_secs(31));
        assert_eq!(first.await.unwrap().succeeded, 1);
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let report = RoundReport::new(
            Uuid::nil(),
            Utc::now(),
            12,
            vec![
                EndpointReport {
                    name: "a".to_string(),
                    strategy: "logical",
                    duration_ms: 5,
                    outcome: EndpointOutcome::Uploaded {
                        object: "a/0/snapshot_x.json".to_string(),
                    },
                },
                EndpointReport {
                    name: "b".to_string(),
                    strategy: "physical",
                    duration_ms: 0,
                    outcome: EndpointOutcome::Skipped,
                },
            ],
        );

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["succeeded"], 1);
        assert_eq!(value["skipped"], 1);
        assert_eq!(value["endpoints"][0]["status"], "uploaded");
        assert_eq!(value["endpoints"][0]["object"], "a/0/snapshot_x.json");
        assert_eq!(value["endpoints"][1]["status"], "skipped");
    }
}
