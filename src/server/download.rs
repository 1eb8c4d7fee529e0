//! Download bodies: the unbounded throttled stream and the fixed-size variant

use super::accountant::{StreamAccountant, StreamTicket};
use super::rate_limiter::RateLimiter;
use crate::logging::StreamLogger;
use crate::models::ServerConfig;
use crate::stats::throughput_mbps;
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One in-flight throttled stream's registration with the accountant.
///
/// The registration is released exactly once, when the handle is dropped.
/// The response body drops it after the client disconnects or the
/// connection fails, and ends the stream itself once server shutdown is
/// requested.
#[derive(Debug)]
pub struct DownloadStreamHandle {
    accountant: Arc<StreamAccountant>,
    ticket: Option<StreamTicket>,
    bytes_sent: u64,
    started_at: Instant,
    logger: StreamLogger,
}

impl DownloadStreamHandle {
    /// Register a new stream with the accountant
    pub fn open(accountant: Arc<StreamAccountant>, logger: StreamLogger, target_mbps: u64) -> Self {
        let ticket = accountant.register_download_stream_start();
        logger.download_started(accountant.active_download_streams(), target_mbps);

        Self {
            accountant,
            ticket: Some(ticket),
            bytes_sent: 0,
            started_at: Instant::now(),
            logger,
        }
    }

    /// Count a chunk handed to the transport
    pub fn record_chunk(&mut self, len: usize) {
        self.bytes_sent += len as u64;
        self.accountant.add_download_bytes(len as u64);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_registered(&self) -> bool {
        self.ticket.is_some()
    }

    fn release(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            let remaining = self.accountant.register_download_stream_end(ticket);
            let elapsed = self.elapsed();
            self.logger.download_stopped(
                self.bytes_sent,
                elapsed,
                throughput_mbps(self.bytes_sent, elapsed.as_secs_f64()),
                remaining,
            );
        }
    }
}

impl Drop for DownloadStreamHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Generates an endless stream of fixed-size chunks paced by a [`RateLimiter`].
#[derive(Debug)]
pub struct ThrottledDownloadProducer {
    handle: DownloadStreamHandle,
    limiter: RateLimiter,
    chunk: Bytes,
    pending_delay: Option<Duration>,
    log_interval: u64,
    next_log_at: u64,
}

impl ThrottledDownloadProducer {
    /// Register a stream and prepare its chunk and limiter from the server configuration
    pub fn start(accountant: Arc<StreamAccountant>, config: &ServerConfig, logger: StreamLogger) -> Self {
        let limiter = RateLimiter::new(config.download_rate_bps, config.max_rate_limit_sleep);
        let handle = DownloadStreamHandle::open(accountant, logger, config.download_rate_mbps());
        let log_interval = crate::defaults::DOWNLOAD_LOG_INTERVAL_BYTES;

        Self {
            handle,
            limiter,
            chunk: Bytes::from(vec![b'A'; config.download_chunk_size]),
            pending_delay: None,
            log_interval,
            next_log_at: log_interval,
        }
    }

    pub fn handle(&self) -> &DownloadStreamHandle {
        &self.handle
    }

    /// Wait out any pacing delay owed by the previous chunk, then produce the next one
    pub async fn next_chunk(&mut self) -> Bytes {
        if let Some(delay) = self.pending_delay.take() {
            tokio::time::sleep(delay).await;
        }

        let chunk = self.chunk.clone();
        self.handle.record_chunk(chunk.len());

        let sent = self.handle.bytes_sent();
        let elapsed = self.handle.elapsed();
        self.pending_delay = self.limiter.delay_for(sent, elapsed);

        if sent >= self.next_log_at {
            self.handle.logger.download_progress(sent, elapsed, throughput_mbps(sent, elapsed.as_secs_f64()));
            self.next_log_at += self.log_interval;
        }

        chunk
    }

    /// Turn the producer into a response body stream that only ends when
    /// `shutdown` is cancelled
    pub fn into_stream(self, shutdown: CancellationToken) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::unfold((self, shutdown), |(mut producer, shutdown)| async move {
            let chunk = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                chunk = producer.next_chunk() => Some(chunk),
            }?;
            Some((Ok(chunk), (producer, shutdown)))
        })
    }
}

/// State of one fixed-size download body
struct FixedBody {
    remaining: u64,
    chunk: Bytes,
    sent: u64,
    started_at: Instant,
    limiter: Option<RateLimiter>,
    shutdown: CancellationToken,
}

impl FixedBody {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.remaining == 0 || self.shutdown.is_cancelled() {
            return None;
        }

        let len = self.remaining.min(self.chunk.len() as u64) as usize;
        if let Some(limiter) = self.limiter {
            // Hold the chunk back until the cap allows it
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = limiter.pace(self.sent + len as u64, self.started_at) => {}
            }
        }

        self.remaining -= len as u64;
        self.sent += len as u64;
        Some(self.chunk.slice(..len))
    }
}

/// `megabytes` MiB of `b'0'`, paced by `limiter` when a download cap is set.
///
/// Uncapped bodies go out in 1 MiB chunks; capped ones use smaller chunks so
/// the pacing stays smooth.
pub fn fixed_download_stream(
    megabytes: u64,
    limiter: Option<RateLimiter>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunk_size = match limiter {
        Some(_) => crate::defaults::CAPPED_DOWNLOAD_CHUNK_SIZE,
        None => crate::defaults::BYTES_PER_MIB as usize,
    };
    let body = FixedBody {
        remaining: megabytes.saturating_mul(crate::defaults::BYTES_PER_MIB),
        chunk: Bytes::from(vec![b'0'; chunk_size]),
        sent: 0,
        started_at: Instant::now(),
        limiter,
        shutdown,
    };

    stream::unfold(body, |mut body| async move {
        let chunk = body.next_chunk().await?;
        Some((Ok(chunk), body))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn producer(accountant: &Arc<StreamAccountant>) -> ThrottledDownloadProducer {
        ThrottledDownloadProducer::start(Arc::clone(accountant), &ServerConfig::default(), StreamLogger::quiet())
    }

    #[test]
    fn test_handle_releases_once_on_drop() {
        let accountant = Arc::new(StreamAccountant::new());
        let mut handle = DownloadStreamHandle::open(Arc::clone(&accountant), StreamLogger::quiet(), 10);
        assert_eq!(accountant.active_download_streams(), 1);

        handle.release();
        assert!(!handle.is_registered());
        assert_eq!(accountant.active_download_streams(), 0);

        // A second stream must not be decremented by the first one's drop
        let _other = DownloadStreamHandle::open(Arc::clone(&accountant), StreamLogger::quiet(), 10);
        drop(handle);
        assert_eq!(accountant.active_download_streams(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_counts_bytes_and_releases_on_drop() {
        let accountant = Arc::new(StreamAccountant::new());
        let mut body = Box::pin(producer(&accountant).into_stream(CancellationToken::new()));
        assert_eq!(accountant.active_download_streams(), 1);

        for _ in 0..4 {
            let chunk = body.next().await.unwrap().unwrap();
            assert_eq!(chunk.len(), 32 * 1024);
            assert!(chunk.iter().all(|&b| b == b'A'));
        }
        assert_eq!(accountant.snapshot().download_bytes, 4 * 32 * 1024);

        drop(body);
        assert_eq!(accountant.active_download_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_is_paced_to_target_rate() {
        let accountant = Arc::new(StreamAccountant::new());
        let mut producer = producer(&accountant);
        let start = Instant::now();

        // 2 seconds' worth of data at 1_280_000 B/s
        let chunks = (2 * 1_280_000) / (32 * 1024);
        for _ in 0..chunks {
            producer.next_chunk().await;
        }

        let elapsed = start.elapsed().as_secs_f64();
        assert!(elapsed >= 1.9, "stream ran too fast: {}s", elapsed);
        assert!(elapsed <= 2.1, "stream ran too slow: {}s", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_while_sleeping_releases_registration() {
        let accountant = Arc::new(StreamAccountant::new());
        let mut producer = producer(&accountant);
        producer.next_chunk().await;

        // The next call sleeps first; cancel it mid-sleep
        let pending = tokio::time::timeout(Duration::from_millis(1), producer.next_chunk()).await;
        assert!(pending.is_err());
        drop(producer);
        assert_eq!(accountant.active_download_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_when_shutdown_is_cancelled() {
        let accountant = Arc::new(StreamAccountant::new());
        let shutdown = CancellationToken::new();
        let mut body = Box::pin(producer(&accountant).into_stream(shutdown.clone()));
        body.next().await.unwrap().unwrap();

        shutdown.cancel();
        assert!(body.next().await.is_none());
        assert_eq!(accountant.active_download_streams(), 0);
    }

    #[tokio::test]
    async fn test_fixed_download_stream_size() {
        let chunks: Vec<_> = fixed_download_stream(3, None, CancellationToken::new()).collect().await;
        assert_eq!(chunks.len(), 3);
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, 3 * 1_048_576);
        assert!(chunks.iter().all(|c| c.as_ref().unwrap().iter().all(|&b| b == b'0')));

        let empty: Vec<_> = fixed_download_stream(0, None, CancellationToken::new()).collect().await;
        assert!(empty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_fixed_download_is_paced() {
        // 2 MiB at 8 Mbps (1 MiB/s) should take about two seconds
        let limiter = RateLimiter::from_mbps(8.0, Duration::from_millis(200));
        let start = Instant::now();
        let chunks: Vec<_> = fixed_download_stream(2, Some(limiter), CancellationToken::new()).collect().await;

        assert_eq!(chunks.len(), 8);
        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().len()).sum();
        assert_eq!(total, 2 * 1_048_576);
        let elapsed = start.elapsed().as_secs_f64();
        assert!((1.95..2.1).contains(&elapsed), "took {}s", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capped_fixed_download_stops_on_shutdown() {
        let limiter = RateLimiter::from_mbps(1.0, Duration::from_millis(200));
        let shutdown = CancellationToken::new();
        let mut body = Box::pin(fixed_download_stream(100, Some(limiter), shutdown.clone()));
        body.next().await.unwrap().unwrap();

        shutdown.cancel();
        assert!(body.next().await.is_none());
    }
}
