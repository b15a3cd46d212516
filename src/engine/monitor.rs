//! Continuous monitoring of routes.
//!
//! Every route gets its own session. A session ticks every `interval`
//! (the first tick fires immediately) for `ceil(duration / interval)`
//! ticks, then waits out the rest of `duration`. Each tick runs one probe
//! bounded by the interval, records a sample, updates the stability
//! metrics and pushes a [`MonitorStatus`] to the subscriber channel.

use super::Route;
use crate::config::{EngineSettings, MonitorConfig, MonitorType};
use crate::errors::{ProbeError, Result, SpeedTestError};
use crate::measurements::{Sample, SampleKind};
use crate::probe::Prober;
use crate::results::{
    DisconnectEvent, MonitorReport, MonitorResult, MonitorStatus,
};
use crate::stats::KindSummary;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Starts monitoring runs.
pub struct Monitor {
    prober: Arc<dyn Prober>,
    settings: EngineSettings,
}

/// A running monitor.
///
/// Updates arrive on [`MonitorHandle::updates`]; a subscriber that falls
/// behind loses updates rather than slowing the sessions down.
#[derive(Debug)]
pub struct MonitorHandle {
    updates: mpsc::Receiver<MonitorStatus>,
    cancel: CancellationToken,
    task: JoinHandle<MonitorReport>,
}

impl MonitorHandle {
    /// Receiver of per-tick status updates.
    pub fn updates(&mut self) -> &mut mpsc::Receiver<MonitorStatus> {
        &mut self.updates
    }

    /// Ask every session to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for every session and return the report.
    pub async fn join(self) -> Result<MonitorReport> {
        self.task.await.map_err(|e| {
            SpeedTestError::internal(format!("monitor task failed: {}", e))
        })
    }
}

/// Everything a session needs besides its route.
struct SessionContext {
    prober: Arc<dyn Prober>,
    target: Url,
    kind: MonitorType,
    probe_bytes: u64,
    interval: Duration,
    duration: Duration,
    ticks: u64,
}

impl Monitor {
    pub fn new(prober: Arc<dyn Prober>, settings: EngineSettings) -> Self {
        Self { prober, settings }
    }

    /// Start monitoring `routes`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `config` - Duration, interval, target and probe kind
    /// * `routes` - Sessions to run, one per route
    /// * `direct_fallback` - Recorded in the report
    /// * `cancel` - Stops every session early
    ///
    /// # Returns
    /// A handle to the running monitor, or a configuration error
    pub fn start(
        &self,
        config: &MonitorConfig,
        routes: Vec<Route>,
        direct_fallback: bool,
        cancel: CancellationToken,
    ) -> Result<MonitorHandle> {
        let target = config.validate()?;
        if routes.is_empty() {
            return Err(SpeedTestError::config("nothing to monitor"));
        }

        let context = Arc::new(SessionContext {
            prober: self.prober.clone(),
            target,
            kind: config.kind,
            probe_bytes: self.settings.monitor_probe_bytes,
            interval: config.interval(),
            duration: config.duration(),
            ticks: config.tick_count(),
        });

        info!(
            "Starting {} monitor on {} route(s): {}s every {}s ({} ticks)",
            config.kind,
            routes.len(),
            config.duration,
            config.interval,
            context.ticks
        );

        let (tx, rx) =
            mpsc::channel(self.settings.monitor_channel_capacity.max(1));
        let config = MonitorConfig {
            target_url: context.target.to_string(),
            ..config.clone()
        };
        let run_token = cancel.child_token();
        let supervisor_token = run_token.clone();

        let task = tokio::spawn(async move {
            let started_at = Utc::now();
            let mut set = JoinSet::new();
            for (index, route) in routes.into_iter().enumerate() {
                set.spawn(run_session(
                    index,
                    route,
                    context.clone(),
                    tx.clone(),
                    supervisor_token.clone(),
                ));
            }
            drop(tx);

            let mut sessions = Vec::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(session) => sessions.push(session),
                    Err(e) => warn!("Monitor session ended abnormally: {}", e),
                }
            }
            sessions.sort_by_key(|(index, _)| *index);
            let sessions: Vec<MonitorResult> =
                sessions.into_iter().map(|(_, result)| result).collect();

            let completed = sessions.iter().all(|s| s.completed);
            info!("Monitor finished, completed={}", completed);

            MonitorReport {
                started_at,
                finished_at: Utc::now(),
                config,
                direct_fallback,
                completed,
                sessions,
            }
        });

        Ok(MonitorHandle { updates: rx, cancel: run_token, task })
    }
}

async fn run_session(
    index: usize,
    route: Route,
    context: Arc<SessionContext>,
    updates: mpsc::Sender<MonitorStatus>,
    cancel: CancellationToken,
) -> (usize, MonitorResult) {
    let start = Instant::now();
    let end = start + context.duration;
    let mut tracker = SessionTracker::new(&route.name, start);
    let mut ticker = tokio::time::interval(context.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut completed = true;

    for tick in 1..=context.ticks {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                completed = false;
                break;
            }
            _ = ticker.tick() => {}
        }

        let at = Instant::now();
        let outcome = probe(&context, &route, &cancel).await;
        if cancel.is_cancelled() {
            completed = false;
            break;
        }

        let overran = matches!(outcome, Err(ProbeError::Timeout(_)));
        let sample = match outcome {
            Ok(sample) => sample,
            Err(error) => {
                if overran {
                    warn!(
                        "{}: tick {} overran the {:?} interval, skipped",
                        route.name, tick, context.interval
                    );
                }
                Sample::failed(&route.name, kind_of(context.kind), &error)
            }
        };

        let status = tracker.record(at, sample, overran, tick as usize);
        match updates.try_send(status) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("{}: subscriber lagging, dropped tick {}", route.name, tick)
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    if completed {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => completed = false,
            _ = tokio::time::sleep_until(end) => {}
        }
    }

    (index, tracker.finish(Instant::now(), completed))
}

fn kind_of(kind: MonitorType) -> SampleKind {
    match kind {
        MonitorType::Latency => SampleKind::Latency,
        MonitorType::Throughput => SampleKind::Download,
    }
}

async fn probe(
    context: &SessionContext,
    route: &Route,
    cancel: &CancellationToken,
) -> std::result::Result<Sample, ProbeError> {
    let via = route.proxy();
    match context.kind {
        MonitorType::Latency => context
            .prober
            .latency(&context.target, via, context.interval, cancel)
            .await
            .map(|ms| Sample::latency(&route.name, ms)),
        MonitorType::Throughput => context
            .prober
            .download_once(
                &context.target,
                via,
                context.probe_bytes,
                context.interval,
                cancel,
            )
            .await
            .map(|m| Sample::throughput(&route.name, SampleKind::Download, &m)),
    }
}

/// Online/offline bookkeeping for one session.
///
/// The time between two ticks is attributed to the state observed at the
/// earlier tick; the time after the last tick to the state of the last.
#[derive(Debug)]
struct SessionTracker {
    name: String,
    start_time: DateTime<Utc>,
    start: Instant,
    samples: Vec<Sample>,
    last: Option<(Instant, bool)>,
    online: Duration,
    streak: Duration,
    max_streak: Duration,
    events: Vec<DisconnectEvent>,
    open_since: Option<Instant>,
    skipped: usize,
    delivered: usize,
    total_bytes: u64,
    last_packet_time: Option<DateTime<Utc>>,
}

impl SessionTracker {
    fn new(name: &str, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            start_time: Utc::now(),
            start,
            samples: Vec::new(),
            last: None,
            online: Duration::ZERO,
            streak: Duration::ZERO,
            max_streak: Duration::ZERO,
            events: Vec::new(),
            open_since: None,
            skipped: 0,
            delivered: 0,
            total_bytes: 0,
            last_packet_time: None,
        }
    }

    fn accrue(&mut self, until: Instant) {
        let Some((since, alive)) = self.last else { return };
        let span = until.saturating_duration_since(since);
        if alive {
            self.online += span;
            self.streak += span;
            self.max_streak = self.max_streak.max(self.streak);
        }
    }

    fn record(
        &mut self,
        at: Instant,
        sample: Sample,
        skipped: bool,
        tick: usize,
    ) -> MonitorStatus {
        self.accrue(at);
        let alive = sample.success;

        if alive {
            self.delivered += 1;
            self.total_bytes += sample.bytes;
            self.last_packet_time = Some(sample.timestamp);
            if let Some(since) = self.open_since.take() {
                if let Some(event) = self.events.last_mut() {
                    event.end = Some(sample.timestamp);
                    event.duration =
                        at.saturating_duration_since(since).as_secs_f64();
                }
                info!("{}: back online", self.name);
            }
        } else {
            self.streak = Duration::ZERO;
            if skipped {
                self.skipped += 1;
            }
            // Only an online route can disconnect.
            let was_alive = self.last.is_some_and(|(_, alive)| alive);
            if was_alive && self.open_since.is_none() {
                let error = sample
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default();
                warn!("{}: disconnected: {}", self.name, error);
                self.events.push(DisconnectEvent {
                    start: sample.timestamp,
                    end: None,
                    duration: 0.0,
                    error,
                });
                self.open_since = Some(at);
            }
        }
        self.last = Some((at, alive));

        let status = MonitorStatus {
            proxy_name: self.name.clone(),
            tick,
            is_alive: alive,
            online_duration: self.online.as_secs_f64(),
            total_duration: at.saturating_duration_since(self.start).as_secs_f64(),
            disconnect_count: self.events.len(),
            data_packet_count: self.delivered,
            total_data_bytes: self.total_bytes,
            last_packet_time: self.last_packet_time,
            last_update: Utc::now(),
            sample: sample.clone(),
        };
        self.samples.push(sample);

        status
    }

    fn finish(mut self, end: Instant, completed: bool) -> MonitorResult {
        self.accrue(end);

        if let Some(since) = self.open_since {
            if let Some(event) = self.events.last_mut() {
                event.duration =
                    end.saturating_duration_since(since).as_secs_f64();
            }
        }

        let total = end.saturating_duration_since(self.start);
        let stability_rate = if total.is_zero() {
            0.0
        } else {
            self.online.as_secs_f64() / total.as_secs_f64() * 100.0
        };
        let kind = self.samples.first().map(|s| s.kind);
        let summary = kind
            .map(|kind| KindSummary::of(&self.samples, kind))
            .unwrap_or_default();

        MonitorResult {
            proxy_name: self.name,
            start_time: self.start_time,
            end_time: Utc::now(),
            total_duration: total.as_secs_f64(),
            online_duration: self.online.as_secs_f64(),
            disconnect_count: self.events.len(),
            disconnect_events: self.events,
            stability_rate,
            max_online_time: self.max_streak.as_secs_f64(),
            is_alive: self.last.is_some_and(|(_, alive)| alive),
            ticks: self.samples.len(),
            skipped_ticks: self.skipped,
            summary,
            samples: self.samples,
            completed,
        }
    }
}
