//! Download probe against the speed server's `__down` endpoint.

use super::{charged, endpoint_url};
use crate::errors::ProbeError;
use crate::measurements::ThroughputMeasurement;
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// `{server}/__down?bytes=N`
pub(crate) fn url(server: &Url, bytes: u64) -> Url {
    let mut url = endpoint_url(server, "__down");
    url.set_query(Some(&format!("bytes={}", bytes)));
    url
}

/// Download exactly `bytes` bytes from `url`.
///
/// The time until response headers is connection setup; only `grace` of it
/// is charged to the transfer. Reading stops as soon as `bytes` bytes have
/// arrived, so an oversized body does not skew the rate.
///
/// # Arguments
/// * `client` - Client for the route under test
/// * `url` - Fully built download URL
/// * `bytes` - Number of bytes expected
/// * `grace` - Connection setup tolerated without charge
/// * `timeout` - Deadline for the whole probe
/// * `cancel` - Run cancellation
///
/// # Returns
/// The measurement, or ShortTransfer when the body ended early
pub(crate) async fn run(
    client: &Client,
    url: &Url,
    bytes: u64,
    grace: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ThroughputMeasurement, ProbeError> {
    debug!("Beginning download of {} bytes from {}", bytes, url);
    let start = Instant::now();
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
        _ = &mut deadline => return Err(ProbeError::Timeout(timeout)),
        response = client.get(url.clone()).send() => {
            response.map_err(|e| ProbeError::from_reqwest(&e, timeout))?
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status(status.as_u16()));
    }

    let setup = start.elapsed();
    let transfer_start = Instant::now();
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    let short =
        |received| ProbeError::ShortTransfer { expected: bytes, received };

    while received < bytes {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(short(received)),
            _ = &mut deadline => return Err(short(received)),
            chunk = stream.next() => match chunk {
                Some(Ok(chunk)) => received += chunk.len() as u64,
                Some(Err(e)) => {
                    debug!("Download interrupted: {}", e);
                    return Err(short(received));
                }
                None => return Err(short(received)),
            },
        }
    }

    let transfer = transfer_start.elapsed();
    let measurement =
        ThroughputMeasurement::new(bytes, charged(setup, transfer, grace));
    debug!(
        "Downloaded {} bytes in {:?} ({:.0} B/s)",
        bytes, measurement.elapsed, measurement.bytes_per_sec
    );

    Ok(measurement)
}
