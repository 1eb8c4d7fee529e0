//! Background download load for the loaded latency phase

use crate::client::MeasurementClient;
use crate::logging::PhaseLogger;
use crate::models::DownloadMeasurement;
use crate::stats::throughput_mbps;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// K concurrent throttled download streams consumed in the background.
///
/// Streams run until [`DownloadLoad::shutdown`] cancels them. Dropping the
/// load without shutting it down aborts every stream task.
#[derive(Debug)]
pub struct DownloadLoad {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    total: Arc<AtomicU64>,
    per_stream: Vec<Arc<AtomicU64>>,
    started_at: Instant,
}

impl DownloadLoad {
    /// Open `streams` download streams; must be called inside a tokio runtime
    pub fn start(client: Arc<dyn MeasurementClient>, streams: usize, log_interval: Duration, logger: PhaseLogger) -> Self {
        let cancel = CancellationToken::new();
        let total = Arc::new(AtomicU64::new(0));
        let per_stream: Vec<_> = (0..streams).map(|_| Arc::new(AtomicU64::new(0))).collect();
        let started_at = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, counter) in per_stream.iter().enumerate() {
            tasks.spawn(consume_stream(StreamWorker {
                index,
                client: Arc::clone(&client),
                cancel: cancel.child_token(),
                total: Arc::clone(&total),
                own: Arc::clone(counter),
                started_at,
                log_interval,
                logger: logger.clone(),
            }));
        }

        Self { tasks, cancel, total, per_stream, started_at }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn per_stream_bytes(&self) -> Vec<u64> {
        self.per_stream.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Time since the streams were opened
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Download throughput over the whole window so far
    pub fn measurement(&self) -> DownloadMeasurement {
        let bytes = self.total_bytes();
        let elapsed_secs = self.elapsed().as_secs_f64();
        DownloadMeasurement {
            speed_mbps: throughput_mbps(bytes, elapsed_secs),
            bytes,
            elapsed_secs,
            per_stream_bytes: self.per_stream_bytes(),
        }
    }

    /// Cancel every stream and wait up to `bound` for them to finish.
    ///
    /// Streams still running after `bound` are aborted. Returns whether all
    /// streams finished on their own.
    pub async fn shutdown(mut self, bound: Duration) -> bool {
        self.cancel.cancel();
        let tasks = &mut self.tasks;
        let drained = timeout(bound, async move { while tasks.join_next().await.is_some() {} })
            .await
            .is_ok();
        if !drained {
            self.tasks.abort_all();
        }
        drained
    }
}

struct StreamWorker {
    index: usize,
    client: Arc<dyn MeasurementClient>,
    cancel: CancellationToken,
    total: Arc<AtomicU64>,
    own: Arc<AtomicU64>,
    started_at: Instant,
    log_interval: Duration,
    logger: PhaseLogger,
}

async fn consume_stream(worker: StreamWorker) {
    let opened = tokio::select! {
        biased;
        _ = worker.cancel.cancelled() => return,
        opened = worker.client.open_download() => opened,
    };
    let mut body = match opened {
        Ok(body) => body,
        Err(e) => {
            worker.logger.stream_error(worker.index, "download", &e);
            return;
        }
    };

    let mut last_log = Instant::now();
    loop {
        tokio::select! {
            biased;
            _ = worker.cancel.cancelled() => break,
            next = body.next() => match next {
                Some(Ok(chunk)) => {
                    let len = chunk.len() as u64;
                    worker.own.fetch_add(len, Ordering::Relaxed);
                    let total = worker.total.fetch_add(len, Ordering::Relaxed) + len;

                    if last_log.elapsed() >= worker.log_interval {
                        let elapsed = worker.started_at.elapsed();
                        worker.logger.download_progress(total, elapsed, throughput_mbps(total, elapsed.as_secs_f64()));
                        last_log = Instant::now();
                    }
                }
                Some(Err(e)) => {
                    worker.logger.stream_error(worker.index, "download", &e);
                    break;
                }
                None => break,
            },
        }
    }
    // Dropping the body closes the connection, which ends the server-side stream
}
