//! Upload phase: concurrent chunked uploads under one phase timeout

use crate::client::MeasurementClient;
use crate::logging::PhaseLogger;
use crate::models::{TestPlan, UploadMeasurement};
use crate::stats::throughput_mbps;
use bytes::Bytes;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};

/// Aggregate upload speed for a phase.
///
/// A phase that timed out or lost a stream only reports a speed when at least
/// `min_partial_bytes` made it through; otherwise it reports 0.
pub fn upload_speed_mbps(total_bytes: u64, elapsed_secs: f64, completed: bool, min_partial_bytes: u64) -> f64 {
    if completed || total_bytes >= min_partial_bytes {
        throughput_mbps(total_bytes, elapsed_secs)
    } else {
        0.0
    }
}

/// Run `plan.upload_streams` concurrent upload loops and measure aggregate throughput.
///
/// Never fails: stream errors and the phase timeout only affect which speed is reported.
pub async fn run_upload_phase(
    client: Arc<dyn MeasurementClient>,
    plan: &TestPlan,
    logger: &PhaseLogger,
) -> UploadMeasurement {
    let total = Arc::new(AtomicU64::new(0));
    let stream_failed = Arc::new(AtomicBool::new(false));
    let payload = Bytes::from(vec![b'A'; plan.upload_chunk_size]);
    let start = Instant::now();

    let streams = (0..plan.upload_streams).map(|index| {
        let client = Arc::clone(&client);
        let total = Arc::clone(&total);
        let stream_failed = Arc::clone(&stream_failed);
        let payload = payload.clone();
        let uploads = plan.uploads_per_stream;
        let delay = plan.upload_chunk_delay;

        async move {
            let stream_id = index.to_string();
            for upload in 0..uploads {
                match client.upload_chunk(&stream_id, payload.clone()).await {
                    Ok(_) => {
                        total.fetch_add(payload.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        logger.stream_error(index, "upload", &e);
                        stream_failed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
                if upload + 1 < uploads {
                    sleep(delay).await;
                }
            }
        }
    });

    let timed_out = timeout(plan.upload_phase_timeout, join_all(streams)).await.is_err();
    let elapsed = start.elapsed().as_secs_f64();
    let bytes = total.load(Ordering::Relaxed);
    let completed = !timed_out && !stream_failed.load(Ordering::Relaxed);

    if timed_out {
        logger
            .logger()
            .warn("Upload phase timed out")
            .field("bytes", bytes)
            .field("timeout_secs", plan.upload_phase_timeout.as_secs_f64())
            .emit();
    }

    UploadMeasurement {
        speed_mbps: upload_speed_mbps(bytes, elapsed, completed, plan.upload_min_partial_bytes),
        bytes,
        elapsed_secs: elapsed,
        completed,
    }
}
