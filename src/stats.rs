//! Statistical reduction of samples and pass/fail evaluation.
//!
//! Every function here is pure. Values are sorted before they are reduced,
//! so results do not depend on the order samples arrived in.

use crate::config::TestConfig;
use crate::measurements::{Sample, SampleKind};
use serde::Serialize;

/// Mean of the values, None when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of already sorted values.
pub fn median(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Percentile of already sorted values with linear interpolation between
/// the closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let pos = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let base = pos.floor() as usize;
    let rest = pos - base as f64;

    match sorted.get(base + 1) {
        Some(next) => Some(sorted[base] + rest * (next - sorted[base])),
        None => Some(sorted[base]),
    }
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values
}

/// Reduction of the samples of one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub count: usize,
    pub success: usize,
    pub failure: usize,
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub p95: Option<f64>,
    pub max: Option<f64>,
}

impl KindSummary {
    /// Summarize the samples of `kind`; failed samples only count.
    pub fn of(samples: &[Sample], kind: SampleKind) -> Self {
        let of_kind = samples.iter().filter(|s| s.kind == kind);
        let count = of_kind.clone().count();
        let values = sorted(
            of_kind.filter(|s| s.success).map(|s| s.value).collect(),
        );

        Self {
            count,
            success: values.len(),
            failure: count - values.len(),
            min: values.first().copied(),
            mean: mean(&values),
            median: median(&values),
            p95: percentile(&values, 0.95),
            max: values.last().copied(),
        }
    }

    pub fn has_success(&self) -> bool {
        self.success > 0
    }
}

/// Per-kind summaries over a set of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub latency: KindSummary,
    pub download: KindSummary,
    pub upload: KindSummary,
}

impl Summary {
    pub fn of(samples: &[Sample]) -> Self {
        Self {
            latency: KindSummary::of(samples, SampleKind::Latency),
            download: KindSummary::of(samples, SampleKind::Download),
            upload: KindSummary::of(samples, SampleKind::Upload),
        }
    }

    pub fn kind(&self, kind: SampleKind) -> &KindSummary {
        match kind {
            SampleKind::Latency => &self.latency,
            SampleKind::Download => &self.download,
            SampleKind::Upload => &self.upload,
        }
    }

    pub fn total(&self) -> usize {
        self.latency.count + self.download.count + self.upload.count
    }
}

/// Thresholds a run is judged against.
///
/// A threshold of 0 is not enforced. A phase that is enabled but produced
/// no successful sample always fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criteria {
    pub max_latency_ms: f64,
    pub min_download: f64,
    pub min_upload: f64,
    pub download_enabled: bool,
    pub upload_enabled: bool,
}

impl Criteria {
    pub fn from_config(config: &TestConfig) -> Self {
        Self {
            max_latency_ms: config.max_latency as f64,
            min_download: config.min_download_speed,
            min_upload: config.min_upload_speed,
            download_enabled: config.download_size > 0,
            upload_enabled: config.upload_size > 0,
        }
    }

    /// Judge a summary.
    pub fn evaluate(&self, summary: &Summary) -> Verdict {
        let latency = check(&summary.latency, true, |mean| {
            self.max_latency_ms <= 0.0 || mean <= self.max_latency_ms
        });
        let download =
            check(&summary.download, self.download_enabled, |mean| {
                self.min_download <= 0.0 || mean >= self.min_download
            });
        let upload = check(&summary.upload, self.upload_enabled, |mean| {
            self.min_upload <= 0.0 || mean >= self.min_upload
        });

        Verdict {
            latency,
            download,
            upload,
            passed: latency && download && upload,
        }
    }
}

fn check(
    summary: &KindSummary,
    enabled: bool,
    within: impl Fn(f64) -> bool,
) -> bool {
    if !enabled {
        return true;
    }
    summary.mean.is_some_and(within)
}

/// Outcome of [`Criteria::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub latency: bool,
    pub download: bool,
    pub upload: bool,
    pub passed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProbeError;
    use crate::measurements::ThroughputMeasurement;
    use proptest::prelude::*;
    use std::time::Duration;

    fn download(bps: f64) -> Sample {
        let measurement =
            ThroughputMeasurement::new(bps as u64, Duration::from_secs(1));
        Sample::throughput("p", SampleKind::Download, &measurement)
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
    }

    #[test]
    fn test_percentile() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 0.5), Some(30.0));
        assert_eq!(percentile(&values, 1.0), Some(50.0));
        assert!((percentile(&values, 0.9).unwrap() - 46.0).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 0.95), Some(7.0));
    }

    #[test]
    fn test_kind_summary_counts_failures() {
        let samples = vec![
            Sample::latency("p", 30.0),
            Sample::latency("p", 10.0),
            Sample::failed("p", SampleKind::Latency, &ProbeError::Cancelled),
            download(100.0),
        ];

        let summary = KindSummary::of(&samples, SampleKind::Latency);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failure, 1);
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.max, Some(30.0));
        assert_eq!(summary.mean, Some(20.0));
    }

    #[test]
    fn test_empty_kind_summary() {
        let summary = KindSummary::of(&[], SampleKind::Upload);
        assert_eq!(summary, KindSummary::default());
        assert!(!summary.has_success());
    }

    fn criteria() -> Criteria {
        Criteria {
            max_latency_ms: 200.0,
            min_download: 1_000_000.0,
            min_upload: 500_000.0,
            download_enabled: true,
            upload_enabled: false,
        }
    }

    #[test]
    fn test_evaluate_pass_and_fail() {
        let samples = vec![Sample::latency("p", 50.0), download(2_000_000.0)];
        let verdict = criteria().evaluate(&Summary::of(&samples));
        assert!(verdict.passed);

        let samples = vec![Sample::latency("p", 250.0), download(2_000_000.0)];
        let verdict = criteria().evaluate(&Summary::of(&samples));
        assert!(!verdict.latency);
        assert!(verdict.download);
        assert!(!verdict.passed);
    }

    #[test]
    fn test_enabled_phase_without_success_fails() {
        let samples = vec![
            Sample::latency("p", 50.0),
            Sample::failed(
                "p",
                SampleKind::Download,
                &ProbeError::Timeout(Duration::from_secs(1)),
            ),
        ];
        let verdict = Criteria { min_download: 0.0, ..criteria() }
            .evaluate(&Summary::of(&samples));
        assert!(!verdict.download);
        assert!(!verdict.passed);
    }

    #[test]
    fn test_zero_threshold_not_enforced() {
        let samples = vec![Sample::latency("p", 5_000.0), download(1.0)];
        let verdict = Criteria {
            max_latency_ms: 0.0,
            min_download: 0.0,
            ..criteria()
        }
        .evaluate(&Summary::of(&samples));
        assert!(verdict.passed);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_summary_is_order_independent(
            values in prop::collection::vec(0.0f64..10_000.0, 0..40),
            seed in any::<u64>(),
        ) {
            let samples: Vec<Sample> =
                values.iter().map(|v| Sample::latency("p", *v)).collect();

            let mut shuffled = samples.clone();
            // Deterministic rotation plus reversal as the permutation.
            if !shuffled.is_empty() {
                let k = (seed % shuffled.len() as u64) as usize;
                shuffled.rotate_left(k);
                shuffled.reverse();
            }

            let a = KindSummary::of(&samples, SampleKind::Latency);
            let b = KindSummary::of(&shuffled, SampleKind::Latency);
            prop_assert_eq!(&a, &b);

            // Idempotent: same input, same output.
            let c = KindSummary::of(&samples, SampleKind::Latency);
            prop_assert_eq!(a, c);
        }

        #[test]
        fn prop_summary_bounds(
            values in prop::collection::vec(0.0f64..10_000.0, 1..40),
        ) {
            let samples: Vec<Sample> =
                values.iter().map(|v| Sample::latency("p", *v)).collect();
            let s = KindSummary::of(&samples, SampleKind::Latency);

            let (min, max) = (s.min.unwrap(), s.max.unwrap());
            prop_assert!(min <= s.median.unwrap() && s.median.unwrap() <= max);
            prop_assert!(min <= s.p95.unwrap() && s.p95.unwrap() <= max);
            prop_assert!(min <= s.mean.unwrap() + 1e-9);
            prop_assert!(s.mean.unwrap() <= max + 1e-9);
        }
    }
}
