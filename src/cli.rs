use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use proxy_speedtest::config::{
    MonitorConfig, MonitorType, TestConfig, DEFAULT_FILTER,
};
use proxy_speedtest::system::SystemInfo;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    long_version = SystemInfo::long_version(),
    about,
    long_about = None
)]
pub struct Cli {
    /// Proxy list: a JSON file or an http(s):// URL
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// Only test proxies whose name matches this pattern
    #[arg(short, long, default_value = DEFAULT_FILTER)]
    pub filter: String,

    /// Skip proxies whose name matches this pattern
    #[arg(short, long, default_value = "")]
    pub block: String,

    /// Speed test server base URL
    #[arg(long, value_name = "URL")]
    pub server_url: Option<String>,

    /// Bytes per download probe (0 skips downloads)
    #[arg(long, value_name = "BYTES")]
    pub download_size: Option<u64>,

    /// Bytes per upload probe (0 skips uploads)
    #[arg(long, value_name = "BYTES")]
    pub upload_size: Option<u64>,

    /// Upper bound on the whole test, in seconds [default: 120 per proxy]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Probes in flight at once
    #[arg(long, value_name = "N")]
    pub concurrent: Option<usize>,

    /// Latency threshold in milliseconds (0 disables it)
    #[arg(long, value_name = "MS")]
    pub max_latency: Option<u64>,

    /// Download threshold in bytes per second (0 disables it)
    #[arg(long, value_name = "BPS")]
    pub min_download_speed: Option<f64>,

    /// Upload threshold in bytes per second (0 disables it)
    #[arg(long, value_name = "BPS")]
    pub min_upload_speed: Option<f64>,

    /// Fewer, smaller probes
    #[arg(long)]
    pub fast: bool,

    /// Monitor instead of running a speed test
    #[arg(long, conflicts_with = "fast")]
    pub monitor: bool,

    /// Monitoring duration in seconds
    #[arg(long, value_name = "SECS", requires = "monitor")]
    pub monitor_duration: Option<u64>,

    /// Seconds between monitor ticks
    #[arg(long, value_name = "SECS", requires = "monitor")]
    pub monitor_interval: Option<u64>,

    /// Probe run on every tick: latency (or http) or throughput
    #[arg(long, value_name = "TYPE", requires = "monitor")]
    pub monitor_type: Option<MonitorType>,

    /// URL probed by the monitor
    #[arg(long, value_name = "URL", requires = "monitor")]
    pub target_url: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the proxies that passed every threshold to this file, in the
    /// proxy list format (the monitor writes its JSON report instead)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,
}

impl Cli {
    pub fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or("")
    }

    /// Test configuration: defaults overridden by the given flags.
    ///
    /// Without `--timeout` the run gets a budget for each of `routes`.
    pub fn test_config(&self, routes: usize) -> TestConfig {
        let defaults = TestConfig::default();
        TestConfig {
            config_path: self.config_path().to_string(),
            filter_regex: self.filter.clone(),
            block_regex: self.block.clone(),
            server_url: self.server_url.clone().unwrap_or(defaults.server_url),
            download_size: self.download_size.unwrap_or(defaults.download_size),
            upload_size: self.upload_size.unwrap_or(defaults.upload_size),
            timeout: self
                .timeout
                .unwrap_or_else(|| TestConfig::timeout_for_routes(routes)),
            concurrent: self.concurrent.unwrap_or(defaults.concurrent),
            max_latency: self.max_latency.unwrap_or(defaults.max_latency),
            min_download_speed: self
                .min_download_speed
                .unwrap_or(defaults.min_download_speed),
            min_upload_speed: self
                .min_upload_speed
                .unwrap_or(defaults.min_upload_speed),
            fast_mode: self.fast,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let defaults = MonitorConfig::default();
        MonitorConfig {
            duration: self.monitor_duration.unwrap_or(defaults.duration),
            interval: self.monitor_interval.unwrap_or(defaults.interval),
            target_url: self.target_url.clone().unwrap_or(defaults.target_url),
            kind: self.monitor_type.unwrap_or(defaults.kind),
        }
    }
}
