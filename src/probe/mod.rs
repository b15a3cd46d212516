//! Network probes.
//!
//! A probe is one bounded measurement: a latency round trip, or a single
//! download or upload of a fixed number of bytes. Probes never retry and
//! never panic on network failures; every failure is a [`ProbeError`].
//!
//! The [`Prober`] trait is the seam between the engine and the network so
//! the orchestrator and the monitor can be driven by a simulated prober in
//! tests. [`HttpProber`] is the reqwest-backed implementation.

pub(crate) mod client;
pub(crate) mod download;
pub(crate) mod latency;
pub(crate) mod upload;

use crate::errors::ProbeError;
use crate::measurements::ThroughputMeasurement;
use crate::proxy::ProxyEndpoint;
use async_trait::async_trait;
use client::ClientCache;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default tolerated connection setup time, see [`HttpProber::setup_grace`].
pub const DEFAULT_SETUP_GRACE: Duration = Duration::from_millis(50);

/// User agent sent with every probe.
pub(crate) static UA: &str =
    concat!("proxy-speedtest/", env!("CARGO_PKG_VERSION"));

/// Measurements the engine can ask for.
///
/// `via` is the proxy to route through, or None for a direct connection.
/// Implementations must honour both `timeout` and `cancel` and must not
/// leave work running after they return.
#[async_trait]
pub trait Prober: Send + Sync {
    /// One round trip to `target`, in milliseconds.
    async fn latency(
        &self,
        target: &Url,
        via: Option<&ProxyEndpoint>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<f64, ProbeError>;

    /// Download exactly `bytes` bytes from `server`.
    async fn download_once(
        &self,
        server: &Url,
        via: Option<&ProxyEndpoint>,
        bytes: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ThroughputMeasurement, ProbeError>;

    /// Upload exactly `bytes` bytes to `server`.
    async fn upload_once(
        &self,
        server: &Url,
        via: Option<&ProxyEndpoint>,
        bytes: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ThroughputMeasurement, ProbeError>;
}

/// Prober that performs real HTTP requests with reqwest.
#[derive(Debug)]
pub struct HttpProber {
    clients: ClientCache,
    setup_grace: Duration,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::with_setup_grace(DEFAULT_SETUP_GRACE)
    }

    /// Build a prober that charges at most `setup_grace` of connection
    /// setup to a transfer.
    pub fn with_setup_grace(setup_grace: Duration) -> Self {
        Self { clients: ClientCache::default(), setup_grace }
    }

    pub fn setup_grace(&self) -> Duration {
        self.setup_grace
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn latency(
        &self,
        target: &Url,
        via: Option<&ProxyEndpoint>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<f64, ProbeError> {
        let client = self.clients.get(via)?;
        latency::measure(&client, target, timeout, cancel).await
    }

    async fn download_once(
        &self,
        server: &Url,
        via: Option<&ProxyEndpoint>,
        bytes: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ThroughputMeasurement, ProbeError> {
        let client = self.clients.get(via)?;
        let url = download::url(server, bytes);
        download::run(&client, &url, bytes, self.setup_grace, timeout, cancel)
            .await
    }

    async fn upload_once(
        &self,
        server: &Url,
        via: Option<&ProxyEndpoint>,
        bytes: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ThroughputMeasurement, ProbeError> {
        let client = self.clients.get(via)?;
        let url = upload::url(server);
        upload::run(&client, &url, bytes, self.setup_grace, timeout, cancel)
            .await
    }
}

/// Append a path segment to a server base URL.
pub(crate) fn endpoint_url(server: &Url, segment: &str) -> Url {
    let mut url = server.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(segment);
    }
    url.set_query(None);
    url
}

/// Run `fut` until it finishes, `timeout` elapses or `cancel` fires,
/// whichever comes first.
pub(crate) async fn bounded<T, F>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => {
            result.unwrap_or(Err(ProbeError::Timeout(timeout)))
        }
    }
}

/// Time charged for a transfer: the transfer itself plus connection setup
/// up to `grace`.
pub(crate) fn charged(
    setup: Duration,
    transfer: Duration,
    grace: Duration,
) -> Duration {
    transfer + setup.min(grace)
}
