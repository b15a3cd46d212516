//! Proxy network performance testing and monitoring.
//!
//! Proxies are narrowed by name patterns ([`proxy::ProxySelector`]), then
//! either speed tested ([`engine::TestOrchestrator`]: latency, download and
//! upload phases on a bounded worker pool) or monitored
//! ([`engine::Monitor`]: one probe per interval, streamed to a
//! subscriber). Samples are reduced by [`stats`] into the reports in
//! [`results`]. [`app::App`] ties it together for front ends.

pub mod app;
pub mod config;
pub mod engine;
pub mod errors;
pub mod measurements;
pub mod probe;
pub mod progress;
pub mod proxy;
pub mod results;
pub mod retry;
pub mod stats;
pub mod system;

pub use app::App;
pub use errors::{Result, SpeedTestError};
