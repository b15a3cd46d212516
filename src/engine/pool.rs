//! Fixed-size worker pool for one phase of probes.
//!
//! `workers` tasks pull probe tasks from a shared queue, so at most
//! `workers` probes are ever in flight. Finished samples go to the
//! collector over a channel. Once the run token is cancelled, workers stop
//! taking tasks and whatever they had in flight is discarded. The pool
//! joins every worker before returning.

use super::Route;
use crate::errors::ProbeError;
use crate::measurements::{Sample, SampleKind};
use crate::probe::Prober;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One probe to run.
#[derive(Debug, Clone)]
pub(crate) struct ProbeTask {
    pub route: Arc<Route>,
    pub kind: SampleKind,
    /// Transfer size; ignored for latency.
    pub bytes: u64,
}

/// What every probe in a run shares.
pub(crate) struct ProbeContext {
    pub prober: Arc<dyn Prober>,
    pub server: Url,
    pub latency_target: Url,
    pub timeout: Duration,
}

impl ProbeContext {
    /// Run a single probe and turn its outcome into a sample.
    pub(crate) async fn execute(
        &self,
        task: &ProbeTask,
        cancel: &CancellationToken,
    ) -> Sample {
        let name = task.route.name.as_str();
        let via = task.route.proxy();

        let outcome = match task.kind {
            SampleKind::Latency => self
                .prober
                .latency(&self.latency_target, via, self.timeout, cancel)
                .await
                .map(|ms| Sample::latency(name, ms)),
            SampleKind::Download => self
                .prober
                .download_once(
                    &self.server,
                    via,
                    task.bytes,
                    self.timeout,
                    cancel,
                )
                .await
                .map(|m| Sample::throughput(name, task.kind, &m)),
            SampleKind::Upload => self
                .prober
                .upload_once(
                    &self.server,
                    via,
                    task.bytes,
                    self.timeout,
                    cancel,
                )
                .await
                .map(|m| Sample::throughput(name, task.kind, &m)),
        };

        outcome.unwrap_or_else(|error| {
            if matches!(error, ProbeError::Resource(_)) {
                warn!(
                    "{} probe via {} has no resource: {}",
                    task.kind, name, error
                );
            } else {
                debug!("{} probe via {} failed: {}", task.kind, name, error);
            }
            Sample::failed(name, task.kind, &error)
        })
    }
}

/// Run `tasks` on `workers` workers.
///
/// # Arguments
/// * `tasks` - Probes of this phase, in queue order
/// * `workers` - Pool size; at most this many probes run at once
/// * `context` - Prober, targets and per-probe timeout
/// * `cancel` - Run token; once cancelled nothing new starts and in-flight
///   results are dropped
/// * `on_sample` - Called for every recorded sample, in arrival order
///
/// # Returns
/// Every recorded sample
pub(crate) async fn run_phase<F>(
    tasks: Vec<ProbeTask>,
    workers: usize,
    context: Arc<ProbeContext>,
    cancel: &CancellationToken,
    mut on_sample: F,
) -> Vec<Sample>
where
    F: FnMut(&Sample),
{
    let total = tasks.len();
    let workers = workers.clamp(1, total.max(1));
    let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
    let (tx, mut rx) = mpsc::channel::<Sample>(workers * 2);

    let mut set = JoinSet::new();
    for id in 0..workers {
        let queue = queue.clone();
        let context = context.clone();
        let cancel = cancel.clone();
        let tx = tx.clone();

        set.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = match queue.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => None,
                };
                let Some(task) = next else { break };

                let sample = context.execute(&task, &cancel).await;
                if cancel.is_cancelled() {
                    debug!(
                        "Worker {} dropping in-flight {} probe",
                        id, task.kind
                    );
                    break;
                }
                if tx.send(sample).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut samples = Vec::with_capacity(total);
    while let Some(sample) = rx.recv().await {
        on_sample(&sample);
        samples.push(sample);
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            warn!("Probe worker ended abnormally: {}", e);
        }
    }

    samples
}
