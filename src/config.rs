//! Run configuration exchanged with callers.
//!
//! [`TestConfig`], [`MonitorConfig`] and [`ConfigInfo`] are plain records
//! with camelCase JSON keys. [`EngineSettings`] holds the tuning knobs that
//! are not part of the exchanged records.

use crate::errors::{Result, SpeedTestError};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default speed test server.
pub const DEFAULT_SERVER_URL: &str = "https://speed.cloudflare.com";

/// Default target of a latency monitor. Throughput monitors default to
/// [`DEFAULT_SERVER_URL`], which serves the download endpoint.
pub const DEFAULT_TARGET_URL: &str = "https://www.gstatic.com/generate_204";

/// Overall timeout granted per tested route when none is given.
pub const ROUTE_BUDGET_SECS: u64 = 120;

/// Default filter pattern, matching every non-empty name.
pub const DEFAULT_FILTER: &str = ".+";

const MIB: u64 = 1024 * 1024;

/// Configuration of a single speed test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestConfig {
    /// Where the proxy list comes from (file path or URL, empty for none).
    pub config_path: String,
    /// Admit only proxies whose name matches (empty admits all).
    pub filter_regex: String,
    /// Reject proxies whose name matches (empty rejects none).
    pub block_regex: String,
    /// Base URL of the speed test server.
    #[serde(rename = "serverURL")]
    pub server_url: String,
    /// Bytes per download probe; 0 disables the download phase.
    pub download_size: u64,
    /// Bytes per upload probe; 0 disables the upload phase.
    pub upload_size: u64,
    /// Upper bound on the whole run, in seconds. Every phase covers every
    /// route, so size it with [`TestConfig::timeout_for_routes`].
    pub timeout: u64,
    /// Maximum number of probes in flight.
    pub concurrent: usize,
    /// Latency threshold in milliseconds (0 disables it).
    pub max_latency: u64,
    /// Download threshold in bytes per second (0 disables it).
    pub min_download_speed: f64,
    /// Upload threshold in bytes per second (0 disables it).
    pub min_upload_speed: f64,
    /// Trade accuracy for speed.
    pub fast_mode: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            config_path: String::new(),
            filter_regex: DEFAULT_FILTER.to_string(),
            block_regex: String::new(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            download_size: 50 * MIB,
            upload_size: 20 * MIB,
            timeout: ROUTE_BUDGET_SECS,
            concurrent: 4,
            max_latency: 800,
            min_download_speed: (5 * MIB) as f64,
            min_upload_speed: (2 * MIB) as f64,
            fast_mode: false,
        }
    }
}

impl TestConfig {
    /// Check every field that can make a run meaningless.
    ///
    /// # Arguments
    /// * `settings` - Engine settings supplying the concurrency cap
    ///
    /// # Returns
    /// The parsed server URL on success, a configuration error otherwise
    pub fn validate(&self, settings: &EngineSettings) -> Result<Url> {
        if self.timeout == 0 {
            return Err(SpeedTestError::config("timeout must be positive"));
        }
        if self.concurrent < 1 || self.concurrent > settings.max_concurrent {
            return Err(SpeedTestError::config(format!(
                "concurrent must be between 1 and {}, got {}",
                settings.max_concurrent, self.concurrent
            )));
        }
        if !self.min_download_speed.is_finite()
            || self.min_download_speed < 0.0
            || !self.min_upload_speed.is_finite()
            || self.min_upload_speed < 0.0
        {
            return Err(SpeedTestError::config(
                "speed thresholds must be finite and non-negative",
            ));
        }

        parse_http_url(&self.server_url, "serverURL")
    }

    /// Overall timeout that leaves each of `routes` a full budget.
    ///
    /// No admitted proxy still means one (direct) route.
    pub fn timeout_for_routes(routes: usize) -> u64 {
        ROUTE_BUDGET_SECS.saturating_mul(routes.max(1) as u64)
    }

    /// The overall deadline as a Duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Which probe a monitor session runs on every tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    /// A latency round trip per tick.
    #[default]
    #[serde(alias = "http")]
    Latency,
    /// A small download per tick.
    Throughput,
}

impl fmt::Display for MonitorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorType::Latency => write!(f, "latency"),
            MonitorType::Throughput => write!(f, "throughput"),
        }
    }
}

impl FromStr for MonitorType {
    type Err = SpeedTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "latency" | "http" => Ok(MonitorType::Latency),
            "throughput" => Ok(MonitorType::Throughput),
            other => Err(SpeedTestError::config(format!(
                "unknown monitor type {:?}",
                other
            ))
            .with_suggestion("Use \"latency\" or \"throughput\".")),
        }
    }
}

/// Configuration of a monitoring run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Total monitoring time in seconds.
    pub duration: u64,
    /// Seconds between ticks.
    pub interval: u64,
    /// URL probed on every tick; empty picks the default for `kind`.
    #[serde(rename = "targetURL")]
    pub target_url: String,
    /// Probe kind.
    #[serde(rename = "type")]
    pub kind: MonitorType,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            duration: 60,
            interval: 5,
            target_url: String::new(),
            kind: MonitorType::Latency,
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration and return the parsed target URL.
    pub fn validate(&self) -> Result<Url> {
        if self.duration == 0 {
            return Err(SpeedTestError::config("duration must be positive"));
        }
        if self.interval == 0 {
            return Err(SpeedTestError::config("interval must be positive"));
        }
        if self.interval > self.duration {
            return Err(SpeedTestError::config(format!(
                "interval ({}s) must not exceed duration ({}s)",
                self.interval, self.duration
            )));
        }

        parse_http_url(self.target(), "targetURL")
    }

    /// The URL ticks go to.
    ///
    /// Throughput ticks download from the speed server's `__down`
    /// endpoint, so their default is the speed server, not a 204 page.
    pub fn target(&self) -> &str {
        match (self.target_url.trim(), self.kind) {
            ("", MonitorType::Latency) => DEFAULT_TARGET_URL,
            ("", MonitorType::Throughput) => DEFAULT_SERVER_URL,
            (target, _) => target,
        }
    }

    /// Number of ticks in a full session: ceil(duration / interval).
    pub fn tick_count(&self) -> u64 {
        if self.interval == 0 {
            return 0;
        }
        self.duration.div_ceil(self.interval)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Summary of a loaded proxy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInfo {
    /// Number of admitted proxies.
    pub proxy_count: usize,
    pub config_path: String,
    pub filter: String,
    pub block: String,
}

/// What to do when selection admits no endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoProxyPolicy {
    /// Run against the target directly and flag it in the report.
    #[default]
    DirectFallback,
    /// Refuse to run.
    Fail,
}

/// Engine tuning that is not part of the exchanged records.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Latency probes per endpoint.
    pub latency_samples: usize,
    /// Download probes per endpoint.
    pub download_samples: usize,
    /// Upload probes per endpoint.
    pub upload_samples: usize,
    /// Transfer size ceiling in fast mode.
    pub fast_mode_max_bytes: u64,
    /// Connection setup time tolerated before a transfer is charged for it.
    pub setup_grace: Duration,
    /// Per-probe timeout ceiling; the remaining run time lowers it further.
    pub probe_timeout: Duration,
    /// Hard cap on `concurrent`.
    pub max_concurrent: usize,
    /// Behaviour when no endpoint is admitted.
    pub no_proxy_policy: NoProxyPolicy,
    /// Download size of a throughput monitor tick.
    pub monitor_probe_bytes: u64,
    /// Capacity of the monitor update channel.
    pub monitor_channel_capacity: usize,
    /// Retry policy for fetching a remote proxy list.
    pub retry: RetryConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            latency_samples: 6,
            download_samples: 4,
            upload_samples: 4,
            fast_mode_max_bytes: MIB,
            setup_grace: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(30),
            max_concurrent: 64,
            no_proxy_policy: NoProxyPolicy::DirectFallback,
            monitor_probe_bytes: 64 * 1024,
            monitor_channel_capacity: 256,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineSettings {
    /// Sample counts (latency, download, upload) for a run.
    ///
    /// Fast mode halves every count, keeping at least one.
    pub fn sample_counts(&self, fast_mode: bool) -> (usize, usize, usize) {
        let scale = |n: usize| if fast_mode { (n / 2).max(1) } else { n };
        (
            scale(self.latency_samples),
            scale(self.download_samples),
            scale(self.upload_samples),
        )
    }

    /// Effective transfer size for a run.
    pub fn transfer_size(&self, requested: u64, fast_mode: bool) -> u64 {
        if fast_mode {
            requested.min(self.fast_mode_max_bytes)
        } else {
            requested
        }
    }
}

fn parse_http_url(raw: &str, field: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| {
        SpeedTestError::config(format!("{} {:?} is not a URL: {}", field, raw, e))
            .with_source(e)
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(SpeedTestError::config(format!(
            "{} must use http or https, got {}",
            field, scheme
        ))),
    }
}
