//! Raw measurements produced by probes.
//!
//! A [`Sample`] is the recorded outcome of one probe. Samples are created
//! once and never mutated; everything downstream (statistics, per-proxy
//! results, monitor metrics) is derived from them.

use crate::errors::ProbeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a sample measured.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Latency,
    Download,
    Upload,
}

impl SampleKind {
    /// Unit of [`Sample::value`] for this kind.
    pub fn unit(&self) -> &'static str {
        match self {
            SampleKind::Latency => "ms",
            SampleKind::Download | SampleKind::Upload => "B/s",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Latency => write!(f, "latency"),
            SampleKind::Download => write!(f, "download"),
            SampleKind::Upload => write!(f, "upload"),
        }
    }
}

/// Error detail carried by a failed sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleError {
    /// Stable code, see [`ProbeError::code`].
    pub code: String,
    pub message: String,
}

impl From<&ProbeError> for SampleError {
    fn from(error: &ProbeError) -> Self {
        Self { code: error.code().to_string(), message: error.to_string() }
    }
}

/// One bounded transfer: bytes moved and the time charged for them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputMeasurement {
    pub bytes: u64,
    pub elapsed: Duration,
    pub bytes_per_sec: f64,
}

impl ThroughputMeasurement {
    /// Build a measurement, deriving the rate from bytes and elapsed time.
    ///
    /// A zero elapsed time is clamped to one microsecond so the rate stays
    /// finite.
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64().max(1e-6);
        Self { bytes, elapsed, bytes_per_sec: bytes as f64 / secs }
    }
}

/// The recorded outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Endpoint name, or the direct label when no proxy was used.
    pub proxy: String,
    pub kind: SampleKind,
    /// Milliseconds for latency, bytes per second for throughput.
    pub value: f64,
    pub bytes: u64,
    /// Time spent, in milliseconds.
    pub duration_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SampleError>,
}

impl Sample {
    pub fn latency(proxy: impl Into<String>, millis: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            proxy: proxy.into(),
            kind: SampleKind::Latency,
            value: millis,
            bytes: 0,
            duration_ms: millis,
            success: true,
            error: None,
        }
    }

    pub fn throughput(
        proxy: impl Into<String>,
        kind: SampleKind,
        measurement: &ThroughputMeasurement,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            proxy: proxy.into(),
            kind,
            value: measurement.bytes_per_sec,
            bytes: measurement.bytes,
            duration_ms: measurement.elapsed.as_secs_f64() * 1000.0,
            success: true,
            error: None,
        }
    }

    pub fn failed(
        proxy: impl Into<String>,
        kind: SampleKind,
        error: &ProbeError,
    ) -> Self {
        let bytes = match error {
            ProbeError::ShortTransfer { received, .. } => *received,
            _ => 0,
        };

        Self {
            timestamp: Utc::now(),
            proxy: proxy.into(),
            kind,
            value: 0.0,
            bytes,
            duration_ms: 0.0,
            success: false,
            error: Some(SampleError::from(error)),
        }
    }
}

/// Mean absolute difference between consecutive values.
///
/// Returns None with fewer than two values.
pub fn jitter(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let jitters: Vec<f64> =
        values.windows(2).map(|pair| (pair[0] - pair[1]).abs()).collect();

    Some(jitters.iter().sum::<f64>() / jitters.len() as f64)
}

/// Percentage of failed samples of `kind`, 0 when there are none.
pub fn packet_loss(samples: &[Sample], kind: SampleKind) -> f64 {
    let (total, failed) = samples
        .iter()
        .filter(|s| s.kind == kind)
        .fold((0usize, 0usize), |(total, failed), s| {
            (total + 1, failed + usize::from(!s.success))
        });

    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_measurement_rate() {
        let m = ThroughputMeasurement::new(1_000_000, Duration::from_millis(500));
        assert!((m.bytes_per_sec - 2_000_000.0).abs() < 1e-6);

        let m = ThroughputMeasurement::new(10, Duration::ZERO);
        assert!(m.bytes_per_sec.is_finite());
    }

    #[test]
    fn test_failed_sample_keeps_partial_bytes() {
        let error = ProbeError::ShortTransfer { expected: 100, received: 30 };
        let sample = Sample::failed("hk", SampleKind::Download, &error);

        assert!(!sample.success);
        assert_eq!(sample.bytes, 30);
        assert_eq!(sample.error.as_ref().unwrap().code, "short_transfer");
    }

    #[test]
    fn test_sample_json() {
        let sample = Sample::latency("hk", 42.0);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["kind"], "latency");
        assert_eq!(json["durationMs"], 42.0);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_jitter() {
        assert_eq!(jitter(&[]), None);
        assert_eq!(jitter(&[10.0]), None);
        assert_eq!(jitter(&[10.0, 20.0, 15.0]), Some(7.5));
    }

    #[test]
    fn test_packet_loss() {
        let samples = vec![
            Sample::latency("a", 10.0),
            Sample::failed("a", SampleKind::Latency, &ProbeError::Cancelled),
            Sample::latency("a", 12.0),
            Sample::failed(
                "a",
                SampleKind::Download,
                &ProbeError::Status(502),
            ),
        ];

        let loss = packet_loss(&samples, SampleKind::Latency);
        assert!((loss - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(packet_loss(&samples, SampleKind::Upload), 0.0);
    }
}
