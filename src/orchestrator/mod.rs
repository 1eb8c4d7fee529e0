//! Test orchestration
//!
//! A run moves through fixed phases, each finished before the next starts:
//!
//! 1. upload: concurrent chunked uploads, partial results allowed
//! 2. baseline: sequential latency probes with no load
//! 3. loaded: background download streams plus sequential latency probes
//! 4. teardown: cancel the download streams, bounded wait
//! 5. scoring: statistics and grade
//!
//! Teardown runs whether or not the earlier phases succeeded.

pub mod download;
pub mod progress;
pub mod upload;

pub use download::DownloadLoad;
pub use progress::{NoopProgress, ProgressSink, ProgressTracker, ProgressUpdate, RecordingProgress};
pub use upload::{run_upload_phase, upload_speed_mbps};

use crate::client::{HttpMeasurementClient, LatencyProbe, LatencySample, MeasurementClient};
use crate::error::{AppError, Result};
use crate::logging::PhaseLogger;
use crate::models::{Config, DownloadMeasurement, LatencyStatistics, TestPlan, TestReport, UploadMeasurement};
use crate::stats::{mean, StatisticsEngine};
use crate::types::TestPhase;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

/// Holds the single-run slot until dropped
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::test_in_progress("A test run is already in progress"))?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Raw measurements from the upload, baseline and loaded phases
struct PhaseMeasurements {
    upload: UploadMeasurement,
    baseline: Vec<LatencySample>,
    loaded: Vec<LatencySample>,
    download: DownloadMeasurement,
}

/// Runs complete bufferbloat tests against one server
pub struct TestOrchestrator {
    client: Arc<dyn MeasurementClient>,
    probe: LatencyProbe,
    plan: TestPlan,
    server_url: String,
    engine: StatisticsEngine,
    logger: PhaseLogger,
    running: AtomicBool,
}

impl TestOrchestrator {
    pub fn new(client: Arc<dyn MeasurementClient>, plan: TestPlan, server_url: impl Into<String>, logger: PhaseLogger) -> Self {
        let probe = LatencyProbe::new(Arc::clone(&client), plan.probe_timeout, plan.probe_timeout_jitter);
        Self {
            client,
            probe,
            plan,
            server_url: server_url.into(),
            engine: StatisticsEngine::with_defaults(),
            logger,
            running: AtomicBool::new(false),
        }
    }

    /// Build an orchestrator with an HTTP client for `config.server_url`
    pub fn from_config(config: &Config, logger: PhaseLogger) -> Result<Self> {
        let client = HttpMeasurementClient::new(&config.server_url)?;
        Ok(Self::new(Arc::new(client), config.plan.clone(), config.server_url.clone(), logger))
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one complete test. Fails with `TestInProgress` if a run is already active.
    pub async fn run(&self, progress: &dyn ProgressSink) -> Result<TestReport> {
        let _guard = RunGuard::acquire(&self.running)?;
        let mut tracker = ProgressTracker::new(progress);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let correlation_id = self.logger.logger().start_operation("bufferbloat_test").await;

        let mut load = None;
        let measured = self.measure(&mut tracker, &mut load).await;
        self.teardown(load.take()).await;

        let outcome = measured.and_then(|m| {
            tracker.advance(TestPhase::Scoring, 90.0, "Calculating results...");
            self.score(run_id, started_at, m)
        });

        self.logger
            .logger()
            .end_operation(&correlation_id, "bufferbloat_test", outcome.is_ok())
            .await;

        match outcome {
            Ok(report) => {
                tracker.advance(TestPhase::Complete, 100.0, "Test complete!");
                Ok(report)
            }
            Err(e) => {
                tracker.fail(format!("Test failed: {}", e));
                Err(e)
            }
        }
    }

    async fn measure(&self, tracker: &mut ProgressTracker<'_>, load: &mut Option<DownloadLoad>) -> Result<PhaseMeasurements> {
        // Upload
        tracker.advance(TestPhase::Upload, 5.0, "Testing upload speed...");
        self.logger.phase_started(TestPhase::Upload).await;
        let phase_start = Instant::now();
        let upload = run_upload_phase(Arc::clone(&self.client), &self.plan, &self.logger).await;
        self.logger
            .phase_completed(TestPhase::Upload, phase_start.elapsed(), &format!("{:.1} Mbps", upload.speed_mbps))
            .await;
        tracker.advance(TestPhase::Upload, 20.0, format!("Upload: {:.1} Mbps", upload.speed_mbps));

        // Baseline
        self.logger.phase_started(TestPhase::Baseline).await;
        let phase_start = Instant::now();
        let baseline = self
            .sample_latency(
                TestPhase::Baseline,
                self.plan.baseline_probe_count(),
                self.plan.baseline_interval,
                tracker,
                (20.0, 15.0),
            )
            .await;
        if baseline.is_empty() {
            return Err(AppError::baseline_unavailable("Failed to measure baseline latency"));
        }
        self.logger
            .phase_completed(
                TestPhase::Baseline,
                phase_start.elapsed(),
                &format!("{} samples, {:.1}ms avg", baseline.len(), mean_millis(&baseline)),
            )
            .await;
        tracker.advance(TestPhase::Baseline, 35.0, format!("Baseline latency: {:.1}ms", mean_millis(&baseline)));

        // Loaded
        tracker.advance(TestPhase::Loaded, 40.0, "Testing download speed and bufferbloat...");
        self.logger.phase_started(TestPhase::Loaded).await;
        let phase_start = Instant::now();
        let active = load.insert(DownloadLoad::start(
            Arc::clone(&self.client),
            self.plan.download_streams,
            self.plan.download_log_interval,
            self.logger.clone(),
        ));
        tracker.advance(TestPhase::Loaded, 50.0, "Waiting for streams to establish...");
        sleep(self.plan.load_settle_delay).await;

        let loaded = self
            .sample_latency(
                TestPhase::Loaded,
                self.plan.loaded_probe_count(),
                self.plan.loaded_interval,
                tracker,
                (50.0, 35.0),
            )
            .await;

        // Measured over the whole window, settling time included
        let download = active.measurement();
        self.logger
            .phase_completed(
                TestPhase::Loaded,
                phase_start.elapsed(),
                &format!("{} samples, download {:.1} Mbps", loaded.len(), download.speed_mbps),
            )
            .await;

        Ok(PhaseMeasurements { upload, baseline, loaded, download })
    }

    /// Take `count` sequential probes `interval` apart; failed probes are dropped
    async fn sample_latency(
        &self,
        phase: TestPhase,
        count: usize,
        interval: Duration,
        tracker: &mut ProgressTracker<'_>,
        (start_percent, span_percent): (f64, f64),
    ) -> Vec<LatencySample> {
        let mut samples = Vec::with_capacity(count);

        for i in 0..count {
            match self.probe.try_measure().await {
                Ok(sample) => {
                    if sample.timed_out {
                        self.logger.probe_timed_out(phase, sample.millis).await;
                    }
                    samples.push(sample);
                    tracker.advance_within(
                        phase,
                        start_percent,
                        span_percent,
                        i as f64 / count as f64,
                        format!(
                            "{} latency: {:.1}ms (avg: {:.1}ms) - {}/{}",
                            phase,
                            sample.millis,
                            mean_millis(&samples),
                            i + 1,
                            count
                        ),
                    );
                }
                Err(e) => {
                    self.logger.probe_failed(phase, &e).await;
                    tracker.advance_within(
                        phase,
                        start_percent,
                        span_percent,
                        i as f64 / count as f64,
                        format!("{} latency: probe failed - {}/{}", phase, i + 1, count),
                    );
                }
            }
            sleep(interval).await;
        }

        samples
    }

    async fn teardown(&self, load: Option<DownloadLoad>) {
        let Some(load) = load else {
            return;
        };

        self.logger.phase_started(TestPhase::Teardown).await;
        let start = Instant::now();
        let clean = load.shutdown(self.plan.teardown_timeout).await;
        let summary = if clean { "all streams closed" } else { "streams aborted after timeout" };
        self.logger.phase_completed(TestPhase::Teardown, start.elapsed(), summary).await;
    }

    fn score(&self, run_id: Uuid, started_at: chrono::DateTime<Utc>, measured: PhaseMeasurements) -> Result<TestReport> {
        let baseline_samples = millis(&measured.baseline);
        let loaded_samples = millis(&measured.loaded);
        let analysis = self.engine.analyze(&baseline_samples, &loaded_samples)?;

        Ok(TestReport {
            run_id,
            server_url: self.server_url.clone(),
            started_at,
            finished_at: Utc::now(),
            upload: measured.upload,
            download: measured.download,
            baseline: LatencyStatistics::from_millis(&baseline_samples).with_timeouts(timeouts(&measured.baseline)),
            loaded: LatencyStatistics::from_millis(&loaded_samples).with_timeouts(timeouts(&measured.loaded)),
            baseline_samples,
            loaded_samples,
            analysis,
        })
    }
}

fn millis(samples: &[LatencySample]) -> Vec<f64> {
    samples.iter().map(|s| s.millis).collect()
}

fn mean_millis(samples: &[LatencySample]) -> f64 {
    mean(&millis(samples))
}

fn timeouts(samples: &[LatencySample]) -> usize {
    samples.iter().filter(|s| s.timed_out).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{AccountingSnapshot, UploadReceipt};
    use crate::types::Grade;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::sync::atomic::AtomicUsize;

    struct OpenGuard(Arc<AtomicUsize>);

    impl Drop for OpenGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// In-process server stand-in: pings are slower while downloads are open
    struct FakeServer {
        idle_ping: Option<Duration>,
        loaded_ping: Duration,
        open_downloads: Arc<AtomicUsize>,
        downloads_opened: AtomicUsize,
    }

    impl FakeServer {
        fn new(idle_ping: Option<Duration>, loaded_ping: Duration) -> Arc<Self> {
            Arc::new(Self {
                idle_ping,
                loaded_ping,
                open_downloads: Arc::new(AtomicUsize::new(0)),
                downloads_opened: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MeasurementClient for FakeServer {
        async fn ping_light(&self) -> Result<()> {
            if self.open_downloads.load(Ordering::SeqCst) > 0 {
                sleep(self.loaded_ping).await;
                return Ok(());
            }
            match self.idle_ping {
                Some(delay) => {
                    sleep(delay).await;
                    Ok(())
                }
                None => Err(AppError::network("connection refused")),
            }
        }

        async fn upload_chunk(&self, _stream_id: &str, data: Bytes) -> Result<UploadReceipt> {
            sleep(Duration::from_millis(10)).await;
            Ok(UploadReceipt {
                status: "received".to_string(),
                bytes: data.len() as u64,
                elapsed: 0.01,
                speed_mbps: 0.0,
                timestamp: 0.0,
                max_configured_mbps: None,
            })
        }

        async fn open_download(&self) -> Result<BoxStream<'static, Result<Bytes>>> {
            self.open_downloads.fetch_add(1, Ordering::SeqCst);
            self.downloads_opened.fetch_add(1, Ordering::SeqCst);
            let guard = OpenGuard(Arc::clone(&self.open_downloads));
            Ok(stream::unfold(guard, |guard| async move {
                sleep(Duration::from_millis(25)).await;
                Some((Ok(Bytes::from(vec![b'A'; 32 * 1024])), guard))
            })
            .boxed())
        }

        async fn fetch_stats(&self) -> Result<AccountingSnapshot> {
            unimplemented!()
        }

        async fn reset_stats(&self) -> Result<()> {
            unimplemented!()
        }
    }

    fn orchestrator(server: &Arc<FakeServer>) -> TestOrchestrator {
        let client: Arc<dyn MeasurementClient> = Arc::clone(server) as Arc<dyn MeasurementClient>;
        TestOrchestrator::new(client, TestPlan::default(), "http://test", PhaseLogger::quiet())
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_grades_and_tears_down() {
        let server = FakeServer::new(Some(Duration::from_millis(20)), Duration::from_millis(40));
        let orchestrator = orchestrator(&server);
        let progress = RecordingProgress::new();

        let report = orchestrator.run(&progress).await.unwrap();

        assert_eq!(report.baseline_samples.len(), 12);
        assert_eq!(report.loaded_samples.len(), 20);
        assert!((report.baseline.mean_ms - 20.0).abs() < 0.5);
        assert!((report.loaded.mean_ms - 40.0).abs() < 0.5);
        assert_eq!(report.analysis.grade, Grade::B);
        assert!(!report.analysis.severe);
        assert!(report.upload.completed);
        assert_eq!(report.upload.bytes, 1_048_576);
        assert!(report.download.bytes > 0);
        assert_eq!(report.download.per_stream_bytes.len(), 2);

        // Every stream was closed by teardown
        assert_eq!(server.downloads_opened.load(Ordering::SeqCst), 2);
        assert_eq!(server.open_downloads.load(Ordering::SeqCst), 0);

        let updates = progress.updates();
        assert!(updates.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(updates.last().unwrap().percent, 100.0);
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_baseline_failure_aborts_run() {
        let server = FakeServer::new(None, Duration::from_millis(40));
        let orchestrator = orchestrator(&server);
        let progress = RecordingProgress::new();

        let err = orchestrator.run(&progress).await.unwrap_err();
        assert!(matches!(err, AppError::BaselineUnavailable(_)));
        assert!(err.to_string().contains("Failed to measure baseline latency"));

        // The loaded phase never started
        assert_eq!(server.downloads_opened.load(Ordering::SeqCst), 0);
        let last = progress.updates().pop().unwrap();
        assert!(last.failed);
        assert_eq!(last.percent, 0.0);
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeouts_register_as_severe() {
        let server = FakeServer::new(Some(Duration::from_millis(20)), Duration::from_secs(5));
        let orchestrator = orchestrator(&server);

        let report = orchestrator.run(&NoopProgress).await.unwrap();
        assert_eq!(report.loaded.timeout_count, 20);
        assert!(report.loaded.mean_ms >= 2000.0);
        assert!(report.analysis.severe);
        assert_eq!(report.analysis.grade, Grade::F);
        assert!(report.analysis.explanation.contains("Severe bufferbloat"));
        assert_eq!(server.open_downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_run_is_rejected() {
        let server = FakeServer::new(Some(Duration::from_millis(20)), Duration::from_millis(40));
        let orchestrator = orchestrator(&server);

        let (first, second) = tokio::join!(orchestrator.run(&NoopProgress), orchestrator.run(&NoopProgress));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(AppError::TestInProgress(_)))));

        // The slot is free again afterwards
        assert!(orchestrator.run(&NoopProgress).await.is_ok());
    }

    #[tokio::test]
    async fn test_from_config_rejects_bad_url() {
        let config = Config {
            server_url: "nope".to_string(),
            ..Config::default()
        };
        assert!(TestOrchestrator::from_config(&config, PhaseLogger::quiet()).is_err());
    }
}
