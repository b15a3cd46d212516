//! Loading candidate proxies from a local file or a remote URL, and
//! saving them back.
//!
//! The list is a JSON document of the form
//! `{"proxies":[{"name":"..","type":"socks5","server":"..","port":1080}]}`.
//! Lists exported by proxy clients also carry types the engine cannot
//! route through (`ss`, `vmess`, `trojan`...); those entries are skipped.

use crate::errors::{ErrorKind, Result, SpeedTestError};
use crate::proxy::{unique_names, ProxyEndpoint};
use crate::retry::{is_transient_http, retry_async, RetryConfig};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use url::Url;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ProxyList {
    #[serde(default)]
    proxies: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct SavedList<'a> {
    proxies: &'a [ProxyEndpoint],
}

/// Parse a proxy list document.
///
/// Entries that are not usable endpoints are logged and skipped; names
/// are made unique.
pub fn parse(document: &str) -> Result<Vec<ProxyEndpoint>> {
    let list: ProxyList = serde_json::from_str(document)?;
    let total = list.proxies.len();

    let mut proxies = Vec::with_capacity(total);
    for (index, entry) in list.proxies.into_iter().enumerate() {
        let label = entry
            .get("name")
            .and_then(Value::as_str)
            .map_or_else(|| format!("#{}", index + 1), str::to_string);
        let kind = entry
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();

        match serde_json::from_value::<ProxyEndpoint>(entry) {
            Ok(endpoint) => proxies.push(endpoint),
            Err(e) => warn!("Skipping proxy {} (type {}): {}", label, kind, e),
        }
    }

    if proxies.len() < total {
        info!("Kept {} of {} proxy entries", proxies.len(), total);
    }

    Ok(unique_names(proxies))
}

/// Render endpoints as a document [`parse`] reads back.
pub fn render(endpoints: &[ProxyEndpoint]) -> Result<String> {
    serde_json::to_string_pretty(&SavedList { proxies: endpoints }).map_err(
        |e| SpeedTestError::internal(format!("cannot render proxy list: {}", e)),
    )
}

/// Write endpoints to `path` as a proxy list.
pub async fn save(path: &Path, endpoints: &[ProxyEndpoint]) -> Result<()> {
    let document = render(endpoints)?;
    tokio::fs::write(path, document).await.map_err(|e| {
        SpeedTestError::io(format!("cannot write {}", path.display()), e)
            .with_suggestion("Check that the directory exists and is writable.")
    })?;

    info!("Saved {} proxies to {}", endpoints.len(), path.display());
    Ok(())
}

/// Load the candidate proxies named by `location`.
///
/// # Arguments
/// * `location` - A file path, an `http(s)://` URL, or empty for none
/// * `retry` - Retry policy for remote fetches
///
/// # Returns
/// The candidates in document order
pub async fn load(
    location: &str,
    retry: &RetryConfig,
) -> Result<Vec<ProxyEndpoint>> {
    let location = location.trim();
    if location.is_empty() {
        debug!("No proxy list configured");
        return Ok(Vec::new());
    }

    let document = if is_remote(location) {
        fetch(location, retry).await?
    } else {
        read_file(Path::new(location)).await?
    };

    let proxies = parse(&document)?;
    info!("Loaded {} proxies from {}", proxies.len(), location);

    Ok(proxies)
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        SpeedTestError::io(
            format!("cannot read proxy list {}", path.display()),
            e,
        )
        .with_suggestion("Check that the file exists and is readable.")
    })
}

async fn fetch(location: &str, retry: &RetryConfig) -> Result<String> {
    let url = Url::parse(location)?;
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| {
            SpeedTestError::resource("cannot build HTTP client").with_source(e)
        })?;

    retry_async(retry, "proxy list download", is_transient_http, || {
        let client = client.clone();
        let url = url.clone();
        async move {
            client.get(url).send().await?.error_for_status()?.text().await
        }
    })
    .await
    .map_err(|exhausted| {
        SpeedTestError::new(
            ErrorKind::Io,
            format!("cannot download proxy list {}: {}", location, exhausted),
        )
        .with_suggestion("Check the URL and your internet connection.")
        .with_source(exhausted)
    })
}
