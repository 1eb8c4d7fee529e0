//! HTTP client for the measurement server

pub mod probe;

pub use probe::{LatencyProbe, LatencySample};

use crate::{
    error::{AppError, Result},
    server::{AccountingSnapshot, UploadReceipt},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::{header, Client, Response, Url};
use std::time::Duration;

/// Timeout for stats and reset calls; streaming calls are bounded by their phase instead
const CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations the orchestrator needs from a measurement server
#[async_trait]
pub trait MeasurementClient: Send + Sync {
    /// Fetch `/api/ping-light` and read its four-byte body
    async fn ping_light(&self) -> Result<()>;

    /// Post one upload body tagged with `stream_id`
    async fn upload_chunk(&self, stream_id: &str, data: Bytes) -> Result<UploadReceipt>;

    /// Open one throttled download stream
    async fn open_download(&self) -> Result<BoxStream<'static, Result<Bytes>>>;

    async fn fetch_stats(&self) -> Result<AccountingSnapshot>;

    async fn reset_stats(&self) -> Result<()>;
}

/// reqwest-backed [`MeasurementClient`]
#[derive(Debug, Clone)]
pub struct HttpMeasurementClient {
    client: Client,
    base_url: Url,
}

impl HttpMeasurementClient {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::parse(format!("Invalid server URL: {}", e)))?;
        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(AppError::validation(format!("Unsupported URL scheme: {}", scheme))),
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache"));

        // No overall timeout: download streams stay open for the whole loaded phase
        let client = Client::builder()
            .user_agent(format!("{}/{}", crate::PKG_NAME, crate::VERSION))
            .default_headers(headers)
            .connect_timeout(CONTROL_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::parse(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn check_status(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(AppError::http_request(format!("{} failed with HTTP {}", what, status.as_u16())))
        }
    }
}

#[async_trait]
impl MeasurementClient for HttpMeasurementClient {
    async fn ping_light(&self) -> Result<()> {
        let response = self.client.get(self.endpoint("/api/ping-light")?).send().await?;
        // Read the body to the end so the connection is pooled for the next probe
        Self::check_status(response, "Latency probe")?.bytes().await?;
        Ok(())
    }

    async fn upload_chunk(&self, stream_id: &str, data: Bytes) -> Result<UploadReceipt> {
        let response = self
            .client
            .post(self.endpoint("/api/upload")?)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(crate::server::handlers::STREAM_ID_HEADER, stream_id)
            .body(data)
            .send()
            .await?;
        let receipt = Self::check_status(response, "Upload")?.json().await?;
        Ok(receipt)
    }

    async fn open_download(&self) -> Result<BoxStream<'static, Result<Bytes>>> {
        let response = self.client.get(self.endpoint("/api/download/throttled")?).send().await?;
        let response = Self::check_status(response, "Download stream")?;
        Ok(response.bytes_stream().map_err(AppError::from).boxed())
    }

    async fn fetch_stats(&self) -> Result<AccountingSnapshot> {
        let response = self
            .client
            .get(self.endpoint("/api/stats")?)
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await?;
        let snapshot = Self::check_status(response, "Stats request")?.json().await?;
        Ok(snapshot)
    }

    async fn reset_stats(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("/api/stats/reset")?)
            .timeout(CONTROL_REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::check_status(response, "Stats reset")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{header as header_matcher, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn mock_client() -> (MockServer, HttpMeasurementClient) {
        let server = MockServer::start().await;
        let client = HttpMeasurementClient::new(&server.uri()).unwrap();
        (server, client)
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(HttpMeasurementClient::new("not a url").is_err());
        let err = HttpMeasurementClient::new("ftp://example.com").unwrap_err();
        assert_eq!(err.category(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_ping_light_success_and_failure() {
        let (server, client) = mock_client().await;
        Mock::given(method("GET"))
            .and(path("/api/ping-light"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ping-light"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(client.ping_light().await.is_ok());
        let err = client.ping_light().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    /// Keep-alive HTTP/1.1 server answering every request with `pong`; counts accepted connections
    async fn counting_pong_server() -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let accepted = std::sync::Arc::new(AtomicUsize::new(0));
        let counter = std::sync::Arc::clone(&accepted);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut pending = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(end) = pending.windows(4).position(|w| w == b"\r\n\r\n") {
                            pending.drain(..end + 4);
                            let reply = b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 4\r\n\r\npong";
                            if socket.write_all(reply).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        (url, accepted)
    }

    #[tokio::test]
    async fn test_ping_light_reuses_connection() {
        let (url, accepted) = counting_pong_server().await;
        let client = HttpMeasurementClient::new(&url).unwrap();

        for _ in 0..5 {
            client.ping_light().await.unwrap();
            // Give the connection task a moment to hand the connection back to the pool
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_sends_stream_id() {
        let (server, client) = mock_client().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .and(header_matcher("x-stream-id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "received",
                "bytes": 4,
                "elapsed": 0.001,
                "speed_mbps": 0.03,
                "timestamp": 1.0,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client.upload_chunk("1", Bytes::from_static(b"AAAA")).await.unwrap();
        assert_eq!(receipt.bytes, 4);
        assert_eq!(receipt.status, "received");
    }

    #[tokio::test]
    async fn test_download_stream_yields_body() {
        let (server, client) = mock_client().await;
        Mock::given(method("GET"))
            .and(path("/api/download/throttled"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'A'; 100_000]))
            .mount(&server)
            .await;

        let mut stream = client.open_download().await.unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 100_000);
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let (server, client) = mock_client().await;
        Mock::given(method("GET"))
            .and(path("/api/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "download_speed_mbps": 9.5,
                "upload_speed_mbps": 0.0,
                "download_bytes": 1_000_000u64,
                "upload_bytes": 0u64,
                "download_elapsed": 0.8,
                "upload_elapsed": 0.0,
                "streams_active": 2u64,
                "timestamp": 1_700_000_000.0,
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/stats/reset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "reset", "timestamp": 1.0})))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client.fetch_stats().await.unwrap();
        assert_eq!(snapshot.streams_active, 2);
        assert_eq!(snapshot.download_bytes, 1_000_000);
        client.reset_stats().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = HttpMeasurementClient::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        let err = client.ping_light().await.unwrap_err();
        assert_eq!(err.category(), "NETWORK");
    }
}
