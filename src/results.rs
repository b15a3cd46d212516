//! Result data structures returned to callers.
//!
//! Everything here is immutable once built and serializes to JSON with
//! camelCase keys for a presentation layer.

use crate::config::{MonitorConfig, TestConfig};
use crate::engine::Route;
use crate::measurements::{jitter, packet_loss, Sample, SampleKind};
use crate::proxy::ProxyEndpoint;
use crate::stats::{mean, Criteria, KindSummary, Summary, Verdict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Label used for samples taken without a proxy.
pub const DIRECT: &str = "DIRECT";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    /// Every planned probe ran.
    Completed,
    /// The overall timeout elapsed first.
    TimedOut,
    /// The run was stopped from outside.
    Cancelled,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Outcome of one speed test run: verdict, summaries and every sample.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// True unless every planned probe ran.
    pub incomplete: bool,
    /// No proxy was admitted and the run went direct.
    pub direct_fallback: bool,
    pub config: TestConfig,
    pub summary: Summary,
    pub verdict: Verdict,
    pub passed: bool,
    /// Per-proxy breakdown, fastest download first.
    pub proxies: Vec<ProxyResult>,
    pub samples: Vec<Sample>,
}

impl TestResult {
    /// Reduce the samples of a run into its report.
    ///
    /// # Arguments
    /// * `config` - The configuration the run used
    /// * `routes` - Every route that was probed, names unique
    /// * `samples` - Everything recorded, in any order
    /// * `outcome` - How the run ended
    /// * `direct_fallback` - Whether the run went direct for lack of proxies
    /// * `started_at` - When the run started
    pub fn build(
        config: &TestConfig,
        routes: &[Route],
        samples: Vec<Sample>,
        outcome: RunOutcome,
        direct_fallback: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let criteria = Criteria::from_config(config);
        let summary = Summary::of(&samples);
        let verdict = criteria.evaluate(&summary);

        let mut proxies: Vec<ProxyResult> = routes
            .iter()
            .map(|route| {
                let own: Vec<Sample> = samples
                    .iter()
                    .filter(|s| s.proxy == route.name)
                    .cloned()
                    .collect();
                ProxyResult::build(route, &own, &criteria)
            })
            .collect();
        proxies.sort_by(|a, b| {
            b.download_speed
                .partial_cmp(&a.download_speed)
                .unwrap_or(Ordering::Equal)
        });

        Self {
            started_at,
            finished_at: Utc::now(),
            outcome,
            incomplete: !outcome.is_complete(),
            direct_fallback,
            config: config.clone(),
            summary,
            verdict,
            passed: verdict.passed,
            proxies,
            samples,
        }
    }

    /// Endpoints whose own results passed every threshold, fastest
    /// download first.
    pub fn passing_endpoints(&self) -> Vec<ProxyEndpoint> {
        self.proxies
            .iter()
            .filter(|proxy| proxy.passed)
            .filter_map(|proxy| proxy.endpoint.clone())
            .collect()
    }

    /// Wall-clock duration of the run in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Results for one proxy (or the direct route).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResult {
    pub proxy_name: String,
    pub proxy_type: String,
    /// Mean latency in milliseconds.
    pub latency: f64,
    /// Mean absolute difference of consecutive latencies in milliseconds.
    pub jitter: f64,
    /// Percentage of failed latency probes.
    pub packet_loss: f64,
    /// Mean download speed in bytes per second.
    pub download_speed: f64,
    /// Mean upload speed in bytes per second.
    pub upload_speed: f64,
    /// Mean bytes per successful download.
    pub download_size: f64,
    /// Mean bytes per successful upload.
    pub upload_size: f64,
    /// Mean download time in milliseconds.
    pub download_time: f64,
    /// Mean upload time in milliseconds.
    pub upload_time: f64,
    pub passed: bool,
    pub summary: Summary,
    /// The tested endpoint; None for the direct route. Kept out of the
    /// report since it may hold credentials.
    #[serde(skip)]
    pub endpoint: Option<ProxyEndpoint>,
}

impl ProxyResult {
    pub fn build(
        route: &Route,
        samples: &[Sample],
        criteria: &Criteria,
    ) -> Self {
        let summary = Summary::of(samples);
        let verdict = criteria.evaluate(&summary);

        let mut latencies: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.kind == SampleKind::Latency && s.success)
            .collect();
        latencies.sort_by_key(|s| s.timestamp);
        let latencies: Vec<f64> = latencies.iter().map(|s| s.value).collect();

        let field = |kind: SampleKind, f: fn(&Sample) -> f64| {
            let values: Vec<f64> = samples
                .iter()
                .filter(|s| s.kind == kind && s.success)
                .map(f)
                .collect();
            mean(&values).unwrap_or(0.0)
        };

        Self {
            proxy_name: route.name.clone(),
            proxy_type: route.kind(),
            latency: summary.latency.mean.unwrap_or(0.0),
            jitter: jitter(&latencies).unwrap_or(0.0),
            packet_loss: packet_loss(samples, SampleKind::Latency),
            download_speed: summary.download.mean.unwrap_or(0.0),
            upload_speed: summary.upload.mean.unwrap_or(0.0),
            download_size: field(SampleKind::Download, |s| s.bytes as f64),
            upload_size: field(SampleKind::Upload, |s| s.bytes as f64),
            download_time: field(SampleKind::Download, |s| s.duration_ms),
            upload_time: field(SampleKind::Upload, |s| s.duration_ms),
            passed: verdict.passed,
            summary,
            endpoint: route.proxy().cloned(),
        }
    }
}

/// A period during which a monitored route was unreachable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectEvent {
    pub start: DateTime<Utc>,
    /// None while the route is still down.
    pub end: Option<DateTime<Utc>>,
    /// Seconds the route was down (up to the end of the session if open).
    pub duration: f64,
    /// Error of the tick that opened the event.
    pub error: String,
}

/// Result of one monitoring session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResult {
    pub proxy_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds.
    pub total_duration: f64,
    /// Seconds the route was reachable.
    pub online_duration: f64,
    pub disconnect_count: usize,
    pub disconnect_events: Vec<DisconnectEvent>,
    /// Online share of the total duration, in percent.
    pub stability_rate: f64,
    /// Longest continuous online stretch in seconds.
    pub max_online_time: f64,
    /// Whether the last tick succeeded.
    pub is_alive: bool,
    /// Ticks that were planned and started.
    pub ticks: usize,
    /// Ticks whose probe overran the interval.
    pub skipped_ticks: usize,
    pub summary: KindSummary,
    pub samples: Vec<Sample>,
    /// False when the session was stopped early.
    pub completed: bool,
}

/// Live status pushed to subscribers after every monitor tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub proxy_name: String,
    /// 1-indexed tick number.
    pub tick: usize,
    pub is_alive: bool,
    /// Seconds.
    pub online_duration: f64,
    /// Seconds.
    pub total_duration: f64,
    pub disconnect_count: usize,
    /// Successful ticks so far.
    pub data_packet_count: usize,
    pub total_data_bytes: u64,
    pub last_packet_time: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
    pub sample: Sample,
}

/// Results of a monitoring run across every session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: MonitorConfig,
    pub direct_fallback: bool,
    /// False when the run was stopped early.
    pub completed: bool,
    pub sessions: Vec<MonitorResult>,
}
