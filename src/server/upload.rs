//! Upload sink: drains a request body and accounts every byte received

use super::accountant::{unix_timestamp, StreamAccountant};
use super::rate_limiter::RateLimiter;
use crate::logging::StreamLogger;
use crate::stats::throughput_mbps;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// Response body for a completed or interrupted upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub status: String,
    pub bytes: u64,
    /// Seconds spent receiving the body
    pub elapsed: f64,
    pub speed_mbps: f64,
    pub timestamp: f64,
    /// Upload cap in force while the body was read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_configured_mbps: Option<f64>,
}

/// Drains upload bodies into the accountant.
///
/// With a cap set, the body is read no faster than the cap allows, so the
/// client sees the limit through transport backpressure.
#[derive(Debug, Clone)]
pub struct UploadConsumer<'a> {
    accountant: &'a StreamAccountant,
    logger: &'a StreamLogger,
    read_size: usize,
    cap: Option<(f64, RateLimiter)>,
    shutdown: CancellationToken,
}

impl<'a> UploadConsumer<'a> {
    pub fn new(accountant: &'a StreamAccountant, logger: &'a StreamLogger, read_size: usize) -> Self {
        Self {
            accountant,
            logger,
            read_size: read_size.max(1),
            cap: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Limit consumption to `mbps`, pacing with `limiter`
    pub fn with_cap(mut self, mbps: f64, limiter: RateLimiter) -> Self {
        self.cap = Some((mbps, limiter));
        self
    }

    /// Stop reading once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Read `body` to its end in `read_size` pieces.
    ///
    /// A body error ends the read early; the bytes received so far stay
    /// counted and are reported in the receipt.
    pub async fn consume<S, E>(&self, body: S, stream_id: Option<&str>) -> UploadReceipt
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.accountant.register_upload_start();
        let started_at = Instant::now();

        let mut reader = StreamReader::new(body.map_err(std::io::Error::other));
        let mut buffer = vec![0u8; self.read_size];
        let mut received = 0u64;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                read = reader.read(&mut buffer) => read,
            };
            match read {
                Ok(0) => break,
                Ok(n) => {
                    received += n as u64;
                    self.accountant.add_upload_bytes(n as u64);
                }
                Err(e) => {
                    self.logger.upload_interrupted(received, &e.to_string());
                    break;
                }
            }

            if let Some((_, limiter)) = self.cap {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = limiter.pace(received, started_at) => {}
                }
            }
        }

        let elapsed = started_at.elapsed();
        let speed_mbps = throughput_mbps(received, elapsed.as_secs_f64());
        self.logger.upload_received(received, elapsed, speed_mbps, stream_id);

        UploadReceipt {
            status: "received".to_string(),
            bytes: received,
            elapsed: elapsed.as_secs_f64(),
            speed_mbps,
            timestamp: unix_timestamp(),
            max_configured_mbps: self.cap.map(|(mbps, _)| mbps),
        }
    }
}
