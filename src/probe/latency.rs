//! Latency probe: time from sending a GET to receiving response headers.

use super::bounded;
use crate::errors::ProbeError;
use log::debug;
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Measure one round trip to `target` in milliseconds.
///
/// Statuses below 500 count as a response; the body is not read.
pub(crate) async fn measure(
    client: &Client,
    target: &Url,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<f64, ProbeError> {
    let start = Instant::now();

    let response = bounded(
        async {
            client
                .get(target.clone())
                .send()
                .await
                .map_err(|e| ProbeError::from_reqwest(&e, timeout))
        },
        timeout,
        cancel,
    )
    .await?;

    let millis = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status();
    debug!("Latency {}: {:.2} ms (status {})", target, millis, status);

    if status.is_server_error() {
        return Err(ProbeError::Status(status.as_u16()));
    }

    Ok(millis)
}
