//! Live progress of a test run.
//!
//! The orchestrator reports phase changes and every recorded sample through
//! a [`ProgressCallback`]; the CLI turns them into status lines.

use crate::measurements::{Sample, SampleKind};
use crate::results::RunOutcome;

/// Phases of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    /// Validating the configuration and selecting proxies
    Selecting,
    /// Running probes of one kind
    Running(SampleKind),
    /// Reducing samples into the report
    Aggregating,
    /// Report produced
    Done,
    /// Configuration rejected before any probe ran
    Failed,
}

/// What the orchestrator reports while a run is underway.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run entered a new phase
    PhaseChange(TestPhase),
    /// A probe finished, successfully or not
    SampleRecorded {
        sample: Sample,
        /// Samples recorded so far in this phase (1-indexed)
        current: usize,
        /// Samples planned for this phase
        total: usize,
    },
    /// The run ended
    Finished(RunOutcome),
}

/// Receives [`ProgressEvent`]s.
///
/// Invoked inline on the orchestrator task; must return quickly.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Callback that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_callback() {
        let seen = Mutex::new(Vec::new());
        let callback = |event: ProgressEvent| {
            if let ProgressEvent::PhaseChange(phase) = event {
                seen.lock().unwrap().push(phase);
            }
        };

        callback.on_progress(ProgressEvent::PhaseChange(TestPhase::Selecting));
        callback.on_progress(ProgressEvent::Finished(RunOutcome::Completed));
        callback.on_progress(ProgressEvent::PhaseChange(TestPhase::Running(
            SampleKind::Latency,
        )));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![TestPhase::Selecting, TestPhase::Running(SampleKind::Latency)]
        );
    }
}
