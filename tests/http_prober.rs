//! HttpProber against a mock speed server.

use proxy_speedtest::errors::ProbeError;
use proxy_speedtest::probe::{HttpProber, Prober};
use proxy_speedtest::proxy::{ProxyEndpoint, ProxyKind};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn server_url(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_download_reads_requested_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/__down"))
        .and(query_param("bytes", "65536"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 65536]))
        .expect(1)
        .mount(&server)
        .await;

    let measurement = HttpProber::new()
        .download_once(
            &server_url(&server),
            None,
            65536,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(measurement.bytes, 65536);
    assert!(measurement.bytes_per_sec > 0.0);
    assert!(measurement.elapsed > Duration::ZERO);
}

#[tokio::test]
async fn test_download_short_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/__down"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 100]))
        .mount(&server)
        .await;

    let error = HttpProber::new()
        .download_once(
            &server_url(&server),
            None,
            4096,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        error,
        ProbeError::ShortTransfer { expected: 4096, received: 100 }
    );
}

#[tokio::test]
async fn test_download_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/__down"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let error = HttpProber::new()
        .download_once(
            &server_url(&server),
            None,
            1024,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(error, ProbeError::Status(404));
}

#[tokio::test]
async fn test_download_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/__down"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let timeout = Duration::from_millis(200);
    let error = HttpProber::new()
        .download_once(
            &server_url(&server),
            None,
            1024,
            timeout,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(error, ProbeError::Timeout(timeout));
}

#[tokio::test]
async fn test_upload_sends_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/__up"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = 200 * 1024;
    let measurement = HttpProber::new()
        .upload_once(
            &server_url(&server),
            None,
            bytes,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(measurement.bytes, bytes);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body.len() as u64, bytes);
}

#[tokio::test]
async fn test_upload_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/__up"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let error = HttpProber::new()
        .upload_once(
            &server_url(&server),
            None,
            1024,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(error, ProbeError::Status(503));
}

#[tokio::test]
async fn test_latency_accepts_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let prober = HttpProber::new();
    let cancel = CancellationToken::new();
    let base = server_url(&server);

    let ms = prober
        .latency(&base.join("generate_204").unwrap(), None, TIMEOUT, &cancel)
        .await
        .unwrap();
    assert!(ms >= 0.0);

    assert!(prober
        .latency(&base.join("missing").unwrap(), None, TIMEOUT, &cancel)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_latency_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let error = HttpProber::new()
        .latency(&server_url(&server), None, TIMEOUT, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error, ProbeError::Status(502));
}

#[tokio::test]
async fn test_latency_measures_delay() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let ms = HttpProber::new()
        .latency(&server_url(&server), None, TIMEOUT, &CancellationToken::new())
        .await
        .unwrap();

    assert!(ms >= 150.0, "latency {} below the server delay", ms);
}

#[tokio::test]
async fn test_cancelled_probe() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let error = HttpProber::new()
        .download_once(&server_url(&server), None, 1024, TIMEOUT, &cancel)
        .await
        .unwrap_err();

    assert_eq!(error, ProbeError::Cancelled);
}

#[tokio::test]
async fn test_unreachable_target() {
    let port = closed_port().await;
    let target = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();

    let error = HttpProber::new()
        .latency(&target, None, TIMEOUT, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(error.code(), "unreachable");
}

#[tokio::test]
async fn test_unreachable_proxy() {
    let server = MockServer::start().await;
    let port = closed_port().await;
    let proxy = ProxyEndpoint::new("dead", ProxyKind::Http, "127.0.0.1", port);

    let error = HttpProber::new()
        .latency(
            &server_url(&server),
            Some(&proxy),
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(error.code(), "unreachable");
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// An HTTP proxy endpoint pointing at the mock server.
fn proxy_at(server: &MockServer) -> ProxyEndpoint {
    let port = server.address().port();
    ProxyEndpoint::new("mock", ProxyKind::Http, "127.0.0.1", port)
}

#[tokio::test]
async fn test_download_through_http_proxy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/__down"))
        .and(query_param("bytes", "4096"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .expect(1)
        .mount(&server)
        .await;

    // Only reachable by way of the proxy.
    let target = Url::parse("http://speed.invalid/").unwrap();
    let measurement = HttpProber::new()
        .download_once(
            &target,
            Some(&proxy_at(&server)),
            4096,
            TIMEOUT,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(measurement.bytes, 4096);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.host_str(), Some("speed.invalid"));
}

#[tokio::test]
async fn test_latency_through_proxy_with_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .and(header_exists("proxy-authorization"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = ProxyEndpoint {
        username: Some("user".to_string()),
        password: Some("secret".to_string()),
        ..proxy_at(&server)
    };
    let target = Url::parse("http://speed.invalid/generate_204").unwrap();

    let ms = HttpProber::new()
        .latency(&target, Some(&proxy), TIMEOUT, &CancellationToken::new())
        .await
        .unwrap();

    assert!(ms >= 0.0);
}
