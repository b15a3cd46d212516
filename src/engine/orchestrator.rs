//! The test orchestrator.
//!
//! Runs the latency, download and upload phases for every route with a
//! bounded worker pool, enforces the overall timeout and reduces the
//! samples into a [`TestResult`].

use super::pool::{run_phase, ProbeContext, ProbeTask};
use super::{plan_routes, Route};
use crate::config::{EngineSettings, TestConfig};
use crate::errors::Result;
use crate::measurements::{Sample, SampleKind};
use crate::probe::{download, Prober};
use crate::progress::{
    NoProgress, ProgressCallback, ProgressEvent, TestPhase,
};
use crate::proxy::{ProxyEndpoint, ProxySelector};
use crate::results::{RunOutcome, TestResult};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Probes planned for one phase.
#[derive(Debug, Clone)]
struct PhasePlan {
    kind: SampleKind,
    per_route: usize,
    bytes: u64,
}

/// Drives speed test runs.
///
/// # Example
/// ```no_run
/// use proxy_speedtest::config::{EngineSettings, TestConfig};
/// use proxy_speedtest::engine::TestOrchestrator;
/// use proxy_speedtest::probe::HttpProber;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> proxy_speedtest::errors::Result<()> {
/// let orchestrator = TestOrchestrator::new(
///     Arc::new(HttpProber::new()),
///     EngineSettings::default(),
/// );
/// let result = orchestrator
///     .run(&TestConfig::default(), &[], CancellationToken::new())
///     .await?;
/// println!("passed: {}", result.passed);
/// # Ok(())
/// # }
/// ```
pub struct TestOrchestrator {
    prober: Arc<dyn Prober>,
    settings: EngineSettings,
    progress: Arc<dyn ProgressCallback>,
}

impl TestOrchestrator {
    pub fn new(prober: Arc<dyn Prober>, settings: EngineSettings) -> Self {
        Self { prober, settings, progress: Arc::new(NoProgress) }
    }

    /// Report progress events to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run a complete test.
    ///
    /// Configuration problems (bad values, patterns that do not compile,
    /// no admitted proxy under the failing policy) are returned before any
    /// probe starts. Everything that goes wrong afterwards is recorded in
    /// the result.
    ///
    /// # Arguments
    /// * `config` - The run configuration
    /// * `candidates` - Proxies to select from
    /// * `cancel` - Stops the run early; partial results are returned
    ///
    /// # Returns
    /// The aggregated result, or a configuration error
    pub async fn run(
        &self,
        config: &TestConfig,
        candidates: &[ProxyEndpoint],
        cancel: CancellationToken,
    ) -> Result<TestResult> {
        self.emit(ProgressEvent::PhaseChange(TestPhase::Selecting));

        let prepared = self.prepare(config, candidates);
        let (server, routes, direct_fallback) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.emit(ProgressEvent::PhaseChange(TestPhase::Failed));
                return Err(e);
            }
        };

        Ok(self.execute(config, &server, routes, direct_fallback, cancel).await)
    }

    fn prepare(
        &self,
        config: &TestConfig,
        candidates: &[ProxyEndpoint],
    ) -> Result<(Url, Vec<Route>, bool)> {
        let server = config.validate(&self.settings)?;
        let selector =
            ProxySelector::new(&config.filter_regex, &config.block_regex)?;
        let admitted = selector.select(candidates);
        let (routes, direct_fallback) = plan_routes(
            admitted,
            candidates.len(),
            self.settings.no_proxy_policy,
        )?;

        Ok((server, routes, direct_fallback))
    }

    fn plan(&self, config: &TestConfig) -> Vec<PhasePlan> {
        let (latency, download, upload) =
            self.settings.sample_counts(config.fast_mode);
        let settings = &self.settings;

        let mut phases = vec![PhasePlan {
            kind: SampleKind::Latency,
            per_route: latency,
            bytes: 0,
        }];
        if config.download_size > 0 {
            phases.push(PhasePlan {
                kind: SampleKind::Download,
                per_route: download,
                bytes: settings
                    .transfer_size(config.download_size, config.fast_mode),
            });
        }
        if config.upload_size > 0 {
            phases.push(PhasePlan {
                kind: SampleKind::Upload,
                per_route: upload,
                bytes: settings
                    .transfer_size(config.upload_size, config.fast_mode),
            });
        }

        phases
    }

    async fn execute(
        &self,
        config: &TestConfig,
        server: &Url,
        routes: Vec<Route>,
        direct_fallback: bool,
        cancel: CancellationToken,
    ) -> TestResult {
        let started_at = Utc::now();
        let phases = self.plan(config);
        let planned = routes.clone();
        let routes: Vec<Arc<Route>> = routes.into_iter().map(Arc::new).collect();

        info!(
            "Starting speed test: {} route(s), {} phase(s), concurrent={}, \
             timeout={}s",
            routes.len(),
            phases.len(),
            config.concurrent,
            config.timeout
        );

        let context = Arc::new(ProbeContext {
            prober: self.prober.clone(),
            server: server.clone(),
            latency_target: download::url(server, 0),
            timeout: self.settings.probe_timeout.min(config.deadline()),
        });

        let run_token = cancel.child_token();
        let mut samples: Vec<Sample> = Vec::new();

        let outcome = {
            let phases_done = self.run_phases(
                &phases,
                &routes,
                config.concurrent,
                context,
                &run_token,
                &mut samples,
            );
            tokio::pin!(phases_done);

            let outcome = tokio::select! {
                biased;
                _ = &mut phases_done => {
                    // Workers also stop on the parent token.
                    if cancel.is_cancelled() {
                        RunOutcome::Cancelled
                    } else {
                        RunOutcome::Completed
                    }
                }
                _ = cancel.cancelled() => RunOutcome::Cancelled,
                _ = tokio::time::sleep(config.deadline()) => RunOutcome::TimedOut,
            };

            if !outcome.is_complete() {
                warn!("Stopping speed test early: {:?}", outcome);
                run_token.cancel();
                phases_done.await;
            }
            outcome
        };

        self.emit(ProgressEvent::PhaseChange(TestPhase::Aggregating));
        let result = TestResult::build(
            config,
            &planned,
            samples,
            outcome,
            direct_fallback,
            started_at,
        );

        info!(
            "Speed test finished ({:?}): {} samples, passed={}",
            outcome,
            result.samples.len(),
            result.passed
        );
        self.emit(ProgressEvent::PhaseChange(TestPhase::Done));
        self.emit(ProgressEvent::Finished(outcome));

        result
    }

    async fn run_phases(
        &self,
        phases: &[PhasePlan],
        routes: &[Arc<Route>],
        concurrent: usize,
        context: Arc<ProbeContext>,
        cancel: &CancellationToken,
        samples: &mut Vec<Sample>,
    ) {
        for phase in phases {
            if cancel.is_cancelled() {
                break;
            }

            let tasks: Vec<ProbeTask> = routes
                .iter()
                .flat_map(|route| {
                    (0..phase.per_route).map(move |_| ProbeTask {
                        route: route.clone(),
                        kind: phase.kind,
                        bytes: phase.bytes,
                    })
                })
                .collect();
            let total = tasks.len();

            info!(
                "Running {} phase: {} probe(s) of {} bytes",
                phase.kind, total, phase.bytes
            );
            self.emit(ProgressEvent::PhaseChange(TestPhase::Running(phase.kind)));

            let mut current = 0;
            let recorded = run_phase(
                tasks,
                concurrent,
                context.clone(),
                cancel,
                |sample| {
                    current += 1;
                    self.emit(ProgressEvent::SampleRecorded {
                        sample: sample.clone(),
                        current,
                        total,
                    });
                },
            )
            .await;

            let failed = recorded.iter().filter(|s| !s.success).count();
            if !recorded.is_empty() && failed == recorded.len() {
                warn!("Every {} probe failed", phase.kind);
            } else {
                debug!(
                    "{} phase: {} recorded, {} failed",
                    phase.kind,
                    recorded.len(),
                    failed
                );
            }
            samples.extend(recorded);
        }
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress.on_progress(event);
    }
}
