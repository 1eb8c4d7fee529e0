//! Measurement server integration tests
//!
//! Each test runs a real server on an ephemeral loopback port and talks to it
//! over HTTP, checking wire behavior and the server-side accounting.

use bufferbloat_tester::{
    client::{HttpMeasurementClient, MeasurementClient},
    logging::StreamLogger,
    models::ServerConfig,
    server::{BufferbloatServer, StreamAccountant},
};
use bytes::Bytes;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    accountant: Arc<StreamAccountant>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<bufferbloat_tester::Result<()>>,
}

impl TestServer {
    async fn start(mut config: ServerConfig) -> Self {
        config.host = "127.0.0.1".to_string();
        config.port = 0;

        let server = BufferbloatServer::new(config, StreamLogger::quiet());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accountant = server.accountant();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server
                .serve(listener, async move {
                    let _ = rx.await;
                })
                .await
        });

        Self { addr, accountant, shutdown: Some(tx), handle }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
        assert!(result.is_ok(), "server did not shut down");
    }
}

/// Poll until the accountant reports `expected` active streams
async fn wait_for_active(accountant: &StreamAccountant, expected: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while accountant.active_download_streams() != expected {
        assert!(
            Instant::now() < deadline,
            "expected {} active streams, still {}",
            expected,
            accountant.active_download_streams()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_ping_endpoints() {
    let server = TestServer::start(ServerConfig::default()).await;
    let http = reqwest::Client::new();

    let light = http.get(server.url("/api/ping-light")).send().await.unwrap();
    assert_eq!(light.status(), 200);
    assert_eq!(light.text().await.unwrap(), "pong");

    let ping: serde_json::Value = http.get(server.url("/api/ping")).send().await.unwrap().json().await.unwrap();
    assert_eq!(ping["status"], "pong");
    assert!(ping["timestamp"].as_f64().unwrap() > 0.0);

    let health = http.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let favicon = http.get(server.url("/favicon.ico")).send().await.unwrap();
    assert_eq!(favicon.status(), 204);

    let missing = http.get(server.url("/api/nope")).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_throttled_download_headers_and_release_on_disconnect() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = reqwest::get(server.url("/api/download/throttled")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-stream-type"], "throttled-10mbps");
    assert_eq!(response.headers()["content-type"], "application/octet-stream");
    assert!(response.headers()["cache-control"].to_str().unwrap().contains("no-store"));

    let mut body = response.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    assert!(first.iter().all(|&b| b == b'A'));
    assert_eq!(server.accountant.active_download_streams(), 1);

    drop(body);
    wait_for_active(&server.accountant, 0).await;
    assert!(server.accountant.snapshot().download_bytes >= first.len() as u64);

    server.stop().await;
}

#[tokio::test]
async fn test_throttled_download_is_paced() {
    let config = ServerConfig {
        download_rate_bps: 256_000,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;

    let response = reqwest::get(server.url("/api/download/throttled")).await.unwrap();
    let mut body = response.bytes_stream();
    let started = Instant::now();
    let mut received = 0u64;
    while started.elapsed() < Duration::from_secs(1) {
        match tokio::time::timeout(Duration::from_millis(500), body.next()).await {
            Ok(Some(Ok(chunk))) => received += chunk.len() as u64,
            Ok(other) => panic!("stream ended early: {:?}", other.map(|r| r.map(|b| b.len()))),
            Err(_) => {}
        }
    }
    drop(body);

    // One second at 256 kB/s, allowing for one chunk of burst and socket buffering
    assert!(received >= 64_000, "received only {} bytes", received);
    assert!(received <= 2 * 256_000 + 64 * 1024, "received {} bytes, pacing not applied", received);

    wait_for_active(&server.accountant, 0).await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_downloads_all_released() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = HttpMeasurementClient::new(&server.base_url()).unwrap();

    let mut streams = Vec::new();
    for _ in 0..4 {
        let mut stream = client.open_download().await.unwrap();
        stream.next().await.unwrap().unwrap();
        streams.push(stream);
    }
    assert_eq!(server.accountant.active_download_streams(), 4);

    let stats = client.fetch_stats().await.unwrap();
    assert_eq!(stats.streams_active, 4);
    assert!(stats.download_bytes > 0);

    streams.truncate(1);
    wait_for_active(&server.accountant, 1).await;
    drop(streams);
    wait_for_active(&server.accountant, 0).await;

    server.stop().await;
}

#[tokio::test]
async fn test_upload_counts_bytes_and_tags_stream() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = HttpMeasurementClient::new(&server.base_url()).unwrap();

    let receipt = client.upload_chunk("1", Bytes::from(vec![7u8; 100_000])).await.unwrap();
    assert_eq!(receipt.status, "received");
    assert_eq!(receipt.bytes, 100_000);
    assert!(receipt.elapsed >= 0.0);

    let empty = client.upload_chunk("0", Bytes::new()).await.unwrap();
    assert_eq!(empty.bytes, 0);

    let stats = client.fetch_stats().await.unwrap();
    assert_eq!(stats.upload_bytes, 100_000);
    assert_eq!(stats.download_bytes, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_fixed_download_size_and_cap() {
    let config = ServerConfig {
        max_fixed_download_mb: 4,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;

    let response = reqwest::get(server.url("/api/download/2")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.content_length(), Some(2 * 1_048_576));
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 2 * 1_048_576);
    assert!(body.iter().all(|&b| b == b'0'));

    let rejected = reqwest::get(server.url("/api/download/5")).await.unwrap();
    assert_eq!(rejected.status(), 400);

    let not_a_number = reqwest::get(server.url("/api/download/lots")).await.unwrap();
    assert_eq!(not_a_number.status(), 400);

    // Fixed downloads are not part of the throttled-stream accounting
    assert_eq!(server.accountant.snapshot().download_bytes, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_reset_zeroes_counters() {
    let server = TestServer::start(ServerConfig::default()).await;
    let client = HttpMeasurementClient::new(&server.base_url()).unwrap();

    client.upload_chunk("0", Bytes::from(vec![1u8; 65_536])).await.unwrap();
    {
        let mut stream = client.open_download().await.unwrap();
        stream.next().await.unwrap().unwrap();
    }
    wait_for_active(&server.accountant, 0).await;

    client.reset_stats().await.unwrap();
    let stats = client.fetch_stats().await.unwrap();
    assert_eq!(stats.download_bytes, 0);
    assert_eq!(stats.upload_bytes, 0);
    assert_eq!(stats.streams_active, 0);
    assert_eq!(stats.download_speed_mbps, 0.0);
    assert_eq!(stats.upload_speed_mbps, 0.0);

    server.stop().await;
}

#[tokio::test]
async fn test_cors_preflight_allowed() {
    let server = TestServer::start(ServerConfig::default()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, server.url("/api/upload"))
        .header("origin", "http://example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("access-control-allow-origin"));

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_ends_live_throttled_stream() {
    let server = TestServer::start(ServerConfig::default()).await;
    let accountant = Arc::clone(&server.accountant);

    let response = reqwest::get(server.url("/api/download/throttled")).await.unwrap();
    let mut body = response.bytes_stream();
    body.next().await.unwrap().unwrap();
    assert_eq!(accountant.active_download_streams(), 1);

    // Keep reading so the stream is still live when shutdown starts
    let reader = tokio::spawn(async move {
        let mut received = 0u64;
        while let Some(Ok(chunk)) = body.next().await {
            received += chunk.len() as u64;
        }
        received
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    server.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "shutdown waited {:?} for the stream",
        started.elapsed()
    );
    wait_for_active(&accountant, 0).await;

    let received = tokio::time::timeout(Duration::from_secs(2), reader).await.unwrap().unwrap();
    assert!(received > 0);
}

#[tokio::test]
async fn test_config_endpoint_and_capped_fixed_download() {
    let config = ServerConfig {
        max_download_mbps: Some(16.0),
        max_upload_mbps: Some(400.0),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;

    let limits: serde_json::Value = reqwest::get(server.url("/api/config")).await.unwrap().json().await.unwrap();
    assert_eq!(limits["max_download_mbps"], 16.0);
    assert_eq!(limits["max_upload_mbps"], 400.0);
    assert_eq!(limits["throttled_download_mbps"], 10);

    // 2 MiB at 16 Mbps (2 MiB/s) takes about a second
    let started = Instant::now();
    let response = reqwest::get(server.url("/api/download/2")).await.unwrap();
    assert_eq!(response.content_length(), Some(2 * 1_048_576));
    let body = response.bytes().await.unwrap();
    let elapsed = started.elapsed();
    assert_eq!(body.len(), 2 * 1_048_576);
    assert!(elapsed >= Duration::from_millis(800), "capped download took only {:?}", elapsed);

    let client = HttpMeasurementClient::new(&server.base_url()).unwrap();
    let receipt = client.upload_chunk("0", Bytes::from(vec![3u8; 32_768])).await.unwrap();
    assert_eq!(receipt.bytes, 32_768);
    assert_eq!(receipt.max_configured_mbps, Some(400.0));

    server.stop().await;
}
