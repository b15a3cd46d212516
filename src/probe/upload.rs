//! Upload probe against the speed server's `__up` endpoint.
//!
//! The payload is streamed in fixed chunks instead of being allocated up
//! front, and the body reports how much of it the client has consumed so a
//! cut-short upload can say how far it got.

use super::{charged, endpoint_url};
use crate::errors::ProbeError;
use crate::measurements::ThroughputMeasurement;
use bytes::Bytes;
use futures::Stream;
use log::debug;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

const CHUNK_SIZE: usize = 64 * 1024;

/// `{server}/__up`
pub(crate) fn url(server: &Url) -> Url {
    endpoint_url(server, "__up")
}

/// Progress of a streamed body, shared with the probe.
#[derive(Debug, Default)]
struct BodyProgress {
    produced: AtomicU64,
    first_poll: OnceLock<Instant>,
}

impl BodyProgress {
    fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }
}

fn payload(
    bytes: u64,
    progress: Arc<BodyProgress>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunk = Bytes::from(vec![b'0'; CHUNK_SIZE]);

    futures::stream::unfold(0u64, move |sent| {
        let chunk = chunk.clone();
        let progress = progress.clone();
        async move {
            if sent >= bytes {
                return None;
            }
            progress.first_poll.get_or_init(Instant::now);
            let len = (bytes - sent).min(CHUNK_SIZE as u64);
            progress.produced.fetch_add(len, Ordering::Relaxed);
            let piece = chunk.slice(..len as usize);
            Some((Ok(piece), sent + len))
        }
    })
}

/// Upload exactly `bytes` bytes to `url`.
///
/// Setup is the time from sending the request until the client first pulls
/// from the body; only `grace` of it is charged to the transfer.
pub(crate) async fn run(
    client: &Client,
    url: &Url,
    bytes: u64,
    grace: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ThroughputMeasurement, ProbeError> {
    debug!("Beginning upload of {} bytes to {}", bytes, url);
    let progress = Arc::new(BodyProgress::default());
    let short = |received| ProbeError::ShortTransfer {
        expected: bytes,
        received,
    };
    // Before any payload moved the failure is about the connection.
    let cut = |fallback: ProbeError| match progress.produced() {
        0 => fallback,
        received => short(received),
    };

    let request = client
        .post(url.clone())
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, bytes)
        .body(Body::wrap_stream(payload(bytes, progress.clone())));

    let start = Instant::now();
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cut(ProbeError::Cancelled)),
        _ = tokio::time::sleep(timeout) => {
            return Err(cut(ProbeError::Timeout(timeout)));
        }
        response = request.send() => match response {
            Ok(response) => response,
            Err(e) => return Err(cut(ProbeError::from_reqwest(&e, timeout))),
        },
    };
    let finish = Instant::now();

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status(status.as_u16()));
    }

    let produced = progress.produced();
    if produced < bytes {
        return Err(short(produced));
    }

    let first_poll = progress.first_poll.get().copied().unwrap_or(start);
    let setup = first_poll.saturating_duration_since(start);
    let transfer = finish.saturating_duration_since(first_poll);
    let measurement =
        ThroughputMeasurement::new(bytes, charged(setup, transfer, grace));
    debug!(
        "Uploaded {} bytes in {:?} ({:.0} B/s)",
        bytes, measurement.elapsed, measurement.bytes_per_sec
    );

    Ok(measurement)
}
