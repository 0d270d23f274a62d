//! # Analyze Orchestrator
//!
//! One `analyze` call is one job:
//!
//! 1. Structural validation. A job without requests, or with a request
//!    pointing past the artifact list, is rejected before any work starts.
//! 2. Every request runs in its own task, sharing the job's
//!    [`JobArtifacts`] and [`JobCache`]. A failing, unknown or panicking
//!    analyzer fills its own slot with an error and nothing else.
//! 3. Results are collected in request order and returned.
//! 4. The serialized report is persisted in the background through the
//!    [`TaskSupervisor`]. Persistence failures are logged; the caller
//!    already has the report.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use fwa_core::{AnalyzerId, HostInfo, JobId};
use fwa_firmware::FirmwareAccessor;
use fwa_store::DurableStore;
use fwa_sync::TaskSupervisor;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::artifacts::{Artifact, JobArtifacts};
use crate::error::{AnalyzeError, AnalyzerError};
use crate::input::{AnalyzerInput, DiffRegionsInput, ImageInfoInput, StableHashMatchInput};
use crate::job_cache::JobCache;
use crate::registry::{AnalyzerRegistry, InputFamily};
use crate::report::{AnalyzeReport, AnalyzerResult, Report};
use crate::request::{AnalyzerRequest, RequestKind};

/// Runs analyze jobs against a fixed registry.
pub struct AnalyzeOrchestrator {
    accessor: Arc<FirmwareAccessor>,
    registry: Arc<AnalyzerRegistry>,
    store: Arc<DurableStore>,
    supervisor: TaskSupervisor,
}

impl AnalyzeOrchestrator {
    pub fn new(
        accessor: Arc<FirmwareAccessor>,
        registry: Arc<AnalyzerRegistry>,
        store: Arc<DurableStore>,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            accessor,
            registry,
            store,
            supervisor,
        }
    }

    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Run `requests` over `artifacts` and return one result per request,
    /// in request order.
    pub async fn analyze(
        &self,
        host_info: HostInfo,
        artifacts: Vec<Artifact>,
        requests: Vec<AnalyzerRequest>,
    ) -> Result<AnalyzeReport, AnalyzeError> {
        validate(&requests, artifacts.len())?;

        let job_id = JobId::new();
        let span = tracing::info_span!("analyze", %job_id, requests = requests.len());
        async move {
            let created_at = Utc::now();
            let started = Instant::now();
            let job = Arc::new(Job {
                artifacts: JobArtifacts::new(artifacts, Arc::clone(&self.accessor)),
                cache: JobCache::new(),
                registry: Arc::clone(&self.registry),
            });

            let ids: Vec<Option<AnalyzerId>> = requests
                .iter()
                .map(|r| r.kind().ok().map(|k| r.resolved_id(k.kind())))
                .collect();
            let mut tasks = AbortOnDrop(
                requests
                    .into_iter()
                    .enumerate()
                    .map(|(index, request)| {
                        let job = Arc::clone(&job);
                        tokio::spawn(
                            async move { job.run(&request).await }
                                .instrument(tracing::debug_span!("request", index)),
                        )
                    })
                    .collect(),
            );
            let joined = futures::future::join_all(tasks.0.iter_mut()).await;

            let results: Vec<AnalyzerResult> = joined
                .into_iter()
                .zip(ids)
                .map(|(joined, id)| match joined {
                    Ok(result) => result,
                    Err(e) => {
                        let reason = if e.is_panic() {
                            "analyzer panicked"
                        } else {
                            "analyzer task was cancelled"
                        };
                        tracing::error!(analyzer = ?id, "{reason}");
                        AnalyzerResult::failed(id, None, AnalyzerError::Failed(reason.into()))
                    }
                })
                .collect();

            let failed = results.iter().filter(|r| r.outcome.is_err()).count();
            tracing::info!(
                failed,
                derived = job.cache.computations(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analyze job finished"
            );

            let report = AnalyzeReport {
                job_id,
                asset_id: host_info.asset_id,
                created_at,
                results,
            };
            self.persist(&report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    fn persist(&self, report: &AnalyzeReport) {
        let json = match report.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("failed to serialize the analyze report: {e}");
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let (job_id, asset_id, created_at) = (report.job_id, report.asset_id, report.created_at);
        let task = async move {
            match store.insert_report(job_id, asset_id, created_at, &json).await {
                Ok(record) => tracing::debug!(
                    %job_id,
                    report_id = %record.report_id.short(),
                    "analyze report stored"
                ),
                Err(e) => tracing::error!(%job_id, "failed to store the analyze report: {e}"),
            }
        };
        if let Err(e) = self.supervisor.spawn("persist_report", task.in_current_span()) {
            tracing::warn!(job_id = %report.job_id, "analyze report not stored: {e}");
        }
    }
}

fn validate(requests: &[AnalyzerRequest], artifacts: usize) -> Result<(), AnalyzeError> {
    if requests.is_empty() {
        return Err(AnalyzeError::NoRequests);
    }
    for (request, r) in requests.iter().enumerate() {
        // Requests without exactly one kind fail in their own slot.
        let Ok(kind) = r.kind() else { continue };
        if let Some(index) = kind.artifact_indexes().into_iter().find(|i| *i >= artifacts) {
            return Err(AnalyzeError::ArtifactOutOfRange {
                request,
                index,
                len: artifacts,
            });
        }
    }
    Ok(())
}

/// State shared by the requests of one job.
struct Job {
    artifacts: JobArtifacts,
    cache: JobCache,
    registry: Arc<AnalyzerRegistry>,
}

impl Job {
    async fn run(&self, request: &AnalyzerRequest) -> AnalyzerResult {
        let kind = match request.kind() {
            Ok(kind) => kind,
            Err(e) => return AnalyzerResult::failed(None, None, e),
        };
        let id = request.resolved_id(kind.kind());
        let (input, outcome) = match kind {
            RequestKind::ImageInfo(p) => {
                self.dispatch(&id, ImageInfoInput::translate(p, &self.artifacts))
                    .await
            }
            RequestKind::StableHashMatch(p) => {
                self.dispatch(&id, StableHashMatchInput::translate(p, &self.artifacts))
                    .await
            }
            RequestKind::DiffRegions(p) => {
                self.dispatch(&id, DiffRegionsInput::translate(p, &self.artifacts))
                    .await
            }
        };
        AnalyzerResult {
            analyzer_id: Some(id),
            input,
            outcome,
        }
    }

    /// Translate the input, look up the analyzer, run it.
    async fn dispatch<I: InputFamily>(
        &self,
        id: &AnalyzerId,
        translate: impl Future<Output = Result<I, AnalyzerError>>,
    ) -> (Option<Value>, Result<Report, AnalyzerError>) {
        let input = match translate.await {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!(analyzer = %id, "failed to prepare the analyzer input: {e}");
                return (None, Err(e));
            }
        };
        let described = input.describe();
        let analyzer = match self.registry.get::<I>(id) {
            Ok(analyzer) => analyzer,
            Err(e) => {
                tracing::warn!(analyzer = %id, "{e}");
                return (Some(described), Err(e));
            }
        };

        let started = Instant::now();
        let outcome = analyzer.analyze(&input, &self.cache).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(report) => tracing::debug!(
                analyzer = %id,
                elapsed_ms,
                issues = report.issues.len(),
                "analyzer finished"
            ),
            Err(e) => tracing::warn!(analyzer = %id, elapsed_ms, "analyzer failed: {e}"),
        }
        (Some(described), outcome)
    }
}

/// Aborts request tasks still running when the job future is dropped.
struct AbortOnDrop(Vec<JoinHandle<AnalyzerResult>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}
